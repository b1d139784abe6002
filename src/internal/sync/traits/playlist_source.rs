use async_trait::async_trait;
use url::Url;

use crate::internal::errors::sync_error::{Result, SyncError};
use crate::internal::sync::structs::PlaylistRef;

/// 歌单元数据来源。引擎只关心歌单与歌曲的 id、下载地址和可选的大小 / 摘要。
#[async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn fetch_playlist(&self, playlist_id: &str) -> Result<PlaylistRef>;
}

/// 通过 REST 接口 `GET <api_base>/playlists/<id>` 获取歌单。
#[derive(Debug, Clone)]
pub struct HttpPlaylistSource {
    client: reqwest::Client,
    api_base: Url,
}

impl HttpPlaylistSource {
    pub fn new(client: reqwest::Client, api_base: Url) -> Self {
        Self { client, api_base }
    }

    fn playlist_url(&self, playlist_id: &str) -> Result<Url> {
        let mut base = self.api_base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join("playlists/")?.join(playlist_id)?)
    }
}

#[async_trait]
impl PlaylistSource for HttpPlaylistSource {
    async fn fetch_playlist(&self, playlist_id: &str) -> Result<PlaylistRef> {
        let url = self.playlist_url(playlist_id)?;
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::HttpStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(resp.json::<PlaylistRef>().await?)
    }
}
