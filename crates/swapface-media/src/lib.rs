//! swapface-media: image and video I/O around the swap pipeline.
//!
//! Reads and writes RGB frames with the `image` crate and shells out to
//! `ffmpeg`/`ffprobe` to split videos into frames and stitch them back.

pub mod frame;
pub mod video;

pub use frame::{list_frames, load_rgb, save_rgb, swapped_path, FrameError};
pub use video::{assemble_video, extract_frames, is_video, probe_fps, restore_audio, VideoError};
