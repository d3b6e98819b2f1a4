/*!
 * External command-line tools behind the pipeline's collaborator traits.
 */

pub mod ffmpeg;
pub mod ytdlp;

pub use ffmpeg::Ffmpeg;
pub use ytdlp::YtDlp;
