pub mod id;
pub mod media;
pub mod pagination;
pub mod sync;

pub use id::MediaId;
pub use media::{MediaFilters, MediaItem, MediaSort, MediaType, NewMediaItem, SortDir, SortField, VrStereo};
pub use pagination::{Page, PageParams};
pub use sync::{
    ClientPresence, PerClientPlayback, PlayAtEphemeral, SessionState, SessionStateView, StateBroadcast,
    SyncUpdate, DEFAULT_SESSION,
};
