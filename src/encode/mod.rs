pub mod ffmpeg;
pub mod wav;
