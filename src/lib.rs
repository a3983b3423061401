#![forbid(unsafe_code)]

mod foundation;

pub mod config;
pub mod encode_ffmpeg;
pub mod frame;
pub mod frame_index;
pub mod loader;
pub mod log_entry;
pub mod processor;
pub mod saver;
pub mod sequence;
pub mod transforms;
pub mod workset;

pub use foundation::{core, error};

pub use config::{EncodingConfig, FfmpegConfig, SeqConfig};
pub use core::{FrameCounter, frame_count_for_duration};
pub use encode_ffmpeg::{EncodeOptions, encode_files, encode_sequence};
pub use error::{SeqError, SeqResult};
pub use frame::Frame;
pub use frame_index::{FrameIndexMap, IndexMode, list_images_in_directory};
pub use loader::{FrameEntry, count_matching_files, directory_frame_counter, load_frame_entry};
pub use log_entry::LogEntry;
pub use processor::{WindowOutput, WindowPosition, WindowTransform, WindowedProcessor};
pub use saver::{AtEndPolicy, OutputFileType, SaverOptions, SequenceSaver};
pub use sequence::AnimationSequence;
pub use transforms::{BlendSmoothing, Tween};
