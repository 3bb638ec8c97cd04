mod common;
pub mod delete;
pub mod healthz;
pub mod list;
pub mod playback_info;
pub mod playlist;
pub mod segment;
pub mod status;
pub mod stream_mp4;
pub mod timeshift;

pub use delete::delete;
pub use healthz::healthz;
pub use list::list;
pub use playback_info::playback_info;
pub use playlist::playlist;
pub use segment::segment;
pub use status::status;
pub use stream_mp4::stream_mp4;
pub use timeshift::timeshift;
