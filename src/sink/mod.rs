//! Result sinks: the display surface and capture persistence.

mod display;
mod store;

pub use display::{ChannelDisplay, LogDisplay, Notice, ResultBoard, ResultDisplay, UiEvent, IDLE_HINT};
pub use store::{
    encode_image, select_store, CollectionRecord, CollectionStore, DirectoryStore, FrameStore,
    ImageEncoding, StorageBackend, StorageCapabilities, StoredImage, COLLECTION_INDEX,
    FILE_PREFIX,
};
