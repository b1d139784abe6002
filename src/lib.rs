/// 内部实现模块
mod internal;


/// 核心入口：引擎、构建器与进度事件接收端
pub use internal::sync::sync_engine::{SyncEngine, SyncEngineBuilder};
pub use internal::sync::sync_context::{ProgressReceiver, SyncContext};

pub mod config {
    use crate::internal;
    pub use internal::config::sync_config::*;
}

pub mod logging {
    use crate::internal;
    pub use internal::logging::*;
}

pub mod errors {
    use crate::internal;
    pub use internal::errors::error_class::ErrorClass;
    pub use internal::errors::sync_error::{Result, SyncError};
}

/// 分片规划与乱序重排，单独可用
pub mod chunking {
    use crate::internal;
    pub use internal::chunking::chunk_planner::*;
    pub use internal::chunking::ordering_buffer::OrderingBuffer;
    pub use internal::chunking::structs::*;
    pub use internal::chunking::traits::*;
}

pub mod throttle {
    use crate::internal;
    pub use internal::throttle::bandwidth_gate::{BandwidthGate, GatePermit};
    pub use internal::throttle::throttle_controller::ThrottleController;
}

pub mod transfer {
    use crate::internal;
    pub use internal::transfer::chunk_transfer::{CHUNK_CHECKSUM_HEADER, ChunkRequest, ChunkTransfer};
    pub use internal::transfer::retry_policy::{Backoff, Classifier, RetryPolicy};
}

pub mod integrity {
    use crate::internal;
    pub use internal::integrity::integrity_verifier::{FileDigest, IntegrityVerifier};
}

pub mod storage {
    use crate::internal;
    pub use internal::storage::download_state_store::{DownloadStateStore, LoadedFrom, STATE_FILE_VERSION};
    pub use internal::storage::structs::*;
    pub use internal::storage::temp_file_manager::{TEMP_SUFFIX, TempFileManager};
}

pub mod sync {
    use crate::internal;
    pub use internal::sync::batch_sync_manager::BatchSyncManager;
    pub use internal::sync::song_coordinator::{FileSinkFactory, SongDownloadCoordinator};
    pub use internal::sync::structs::*;
    pub use internal::sync::sync_controller::SyncController;
    pub use internal::sync::traits::*;
}

pub mod states {
    pub mod lock_reactive {
        use crate::internal;
        pub use internal::states::lock_reactive::*;
    }

    pub mod unlock_reactive {
        use crate::internal;
        pub use internal::states::unlock_reactive::*;
    }

    pub mod queue_reactive {
        use crate::internal;
        pub use internal::states::queue_reactive::*;
    }
}
