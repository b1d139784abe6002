use serde::{Deserialize, Serialize};

use super::song_ref::SongRef;

/// 元数据接口给出的歌单。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(default)]
    pub songs: Vec<SongRef>,
}
