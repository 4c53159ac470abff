//! External encoder process.
//!
//! The pipeline never encodes anything itself. It launches one encoder
//! (ffmpeg by default), feeds raw RGBA8 frames to its stdin and reads its
//! stderr back only when the pipe is closed.
//!
//! | Item               | Purpose                                           |
//! |--------------------|---------------------------------------------------|
//! | [`EncoderPreset`]  | Codec / pixel-format options and file suffix      |
//! | [`EncoderCommand`] | Full command line for one recording               |
//! | [`locate`]         | Executable lookup (literal path, then `PATH`)     |
//! | [`process`]        | Spawned child with background stdout/stderr drains|

pub mod locate;
pub mod process;

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipeError;
use crate::frame::FrameSize;

pub use locate::locate_executable;
pub use process::EncoderProcess;

// ── EncoderPreset ────────────────────────────────────────────────

/// Encoder settings bundled by target codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncoderPreset {
    /// H.264 via libx264, yuv420p.
    #[default]
    H264Default,
    /// H.264 via NVENC.
    H264Nvidia,
    /// Lossless H.264, yuv420p.
    H264Lossless420,
    /// Lossless H.264, yuv444p.
    H264Lossless444,
    /// HEVC via libx265.
    HevcDefault,
    /// HEVC via NVENC.
    HevcNvidia,
    /// Apple ProRes 422 (10-bit).
    ProRes422,
    /// Apple ProRes 4444 with alpha.
    ProRes4444,
    /// VP8 via libvpx.
    Vp8Default,
    /// VP9 via libvpx-vp9.
    Vp9Default,
    /// HAP.
    Hap,
    /// HAP with alpha.
    HapAlpha,
    /// HAP Q.
    HapQ,
}

impl EncoderPreset {
    pub const ALL: [EncoderPreset; 13] = [
        EncoderPreset::H264Default,
        EncoderPreset::H264Nvidia,
        EncoderPreset::H264Lossless420,
        EncoderPreset::H264Lossless444,
        EncoderPreset::HevcDefault,
        EncoderPreset::HevcNvidia,
        EncoderPreset::ProRes422,
        EncoderPreset::ProRes4444,
        EncoderPreset::Vp8Default,
        EncoderPreset::Vp9Default,
        EncoderPreset::Hap,
        EncoderPreset::HapAlpha,
        EncoderPreset::HapQ,
    ];

    /// Human-readable name.
    pub const fn display_name(self) -> &'static str {
        match self {
            EncoderPreset::H264Default => "H.264 Default (MP4)",
            EncoderPreset::H264Nvidia => "H.264 NVIDIA (MP4)",
            EncoderPreset::H264Lossless420 => "H.264 Lossless 420 (MP4)",
            EncoderPreset::H264Lossless444 => "H.264 Lossless 444 (MP4)",
            EncoderPreset::HevcDefault => "HEVC Default (MP4)",
            EncoderPreset::HevcNvidia => "HEVC NVIDIA (MP4)",
            EncoderPreset::ProRes422 => "ProRes 422 (QuickTime)",
            EncoderPreset::ProRes4444 => "ProRes 4444 (QuickTime)",
            EncoderPreset::Vp8Default => "VP8 (WebM)",
            EncoderPreset::Vp9Default => "VP9 (WebM)",
            EncoderPreset::Hap => "HAP (QuickTime)",
            EncoderPreset::HapAlpha => "HAP Alpha (QuickTime)",
            EncoderPreset::HapQ => "HAP Q (QuickTime)",
        }
    }

    /// Container file extension, including the dot.
    pub const fn suffix(self) -> &'static str {
        match self {
            EncoderPreset::H264Default
            | EncoderPreset::H264Nvidia
            | EncoderPreset::H264Lossless420
            | EncoderPreset::H264Lossless444
            | EncoderPreset::HevcDefault
            | EncoderPreset::HevcNvidia => ".mp4",
            EncoderPreset::ProRes422
            | EncoderPreset::ProRes4444
            | EncoderPreset::Hap
            | EncoderPreset::HapAlpha
            | EncoderPreset::HapQ => ".mov",
            EncoderPreset::Vp8Default | EncoderPreset::Vp9Default => ".webm",
        }
    }

    /// Output-side encoder options.
    pub const fn options(self) -> &'static [&'static str] {
        match self {
            EncoderPreset::H264Default => &["-pix_fmt", "yuv420p"],
            EncoderPreset::H264Nvidia => &["-c:v", "h264_nvenc", "-pix_fmt", "yuv420p"],
            EncoderPreset::H264Lossless420 => {
                &["-pix_fmt", "yuv420p", "-preset", "ultrafast", "-crf", "0"]
            }
            EncoderPreset::H264Lossless444 => {
                &["-pix_fmt", "yuv444p", "-preset", "ultrafast", "-crf", "0"]
            }
            EncoderPreset::HevcDefault => &["-c:v", "libx265", "-pix_fmt", "yuv420p"],
            EncoderPreset::HevcNvidia => &["-c:v", "hevc_nvenc", "-pix_fmt", "yuv420p"],
            EncoderPreset::ProRes422 => &["-c:v", "prores_ks", "-pix_fmt", "yuv422p10le"],
            EncoderPreset::ProRes4444 => &["-c:v", "prores_ks", "-pix_fmt", "yuva444p10le"],
            EncoderPreset::Vp8Default => &["-c:v", "libvpx", "-pix_fmt", "yuv420p"],
            EncoderPreset::Vp9Default => &["-c:v", "libvpx-vp9"],
            EncoderPreset::Hap => &["-c:v", "hap"],
            EncoderPreset::HapAlpha => &["-c:v", "hap", "-format", "hap_alpha"],
            EncoderPreset::HapQ => &["-c:v", "hap", "-format", "hap_q"],
        }
    }
}

// ── EncoderCommand ───────────────────────────────────────────────

/// Everything needed to launch the encoder for one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderCommand {
    /// Executable name or path; resolved with [`locate_executable`].
    pub executable: String,
    /// Frame dimensions of the raw input stream.
    pub size: FrameSize,
    /// Input frame rate in frames per second.
    pub frame_rate: f64,
    /// Output codec settings.
    pub preset: EncoderPreset,
    /// Output file. The preset suffix is appended when it has no extension.
    pub output: PathBuf,
}

impl Default for EncoderCommand {
    fn default() -> Self {
        Self {
            executable: "ffmpeg".into(),
            size: FrameSize::new(1920, 1080),
            frame_rate: 30.0,
            preset: EncoderPreset::default(),
            output: PathBuf::from("capture"),
        }
    }
}

impl EncoderCommand {
    /// Output path with the preset suffix applied when missing.
    pub fn output_path(&self) -> PathBuf {
        if self.output.extension().is_some() {
            return self.output.clone();
        }
        let mut name = self.output.clone().into_os_string();
        name.push(self.preset.suffix());
        PathBuf::from(name)
    }

    /// Arguments passed to the encoder, in order.
    ///
    /// The raw input description comes first, then `-i -` (stdin), then
    /// the preset options and the output path.
    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-y",
            "-f",
            "rawvideo",
            "-vcodec",
            "rawvideo",
            "-pixel_format",
            "rgba",
            "-colorspace",
            "bt709",
            "-video_size",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();

        args.push(self.size.to_string().into());
        args.push("-framerate".into());
        args.push(self.frame_rate.to_string().into());
        args.extend(["-loglevel", "warning", "-i", "-"].map(OsString::from));
        args.extend(self.preset.options().iter().map(OsString::from));
        args.push(self.output_path().into_os_string());
        args
    }

    /// Resolve the executable to a concrete path.
    pub fn resolve(&self) -> Result<PathBuf, PipeError> {
        locate_executable(&self.executable)
            .ok_or_else(|| PipeError::ExecutableNotFound(self.executable.clone()))
    }

    /// Build a `std::process::Command` for an already resolved program.
    pub fn to_command(&self, program: &Path) -> std::process::Command {
        let mut command = std::process::Command::new(program);
        command.args(self.args());
        command
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cmd: &EncoderCommand) -> Vec<String> {
        cmd.args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn raw_input_precedes_stdin_marker() {
        let cmd = EncoderCommand {
            size: FrameSize::new(640, 360),
            frame_rate: 60.0,
            output: PathBuf::from("out"),
            ..Default::default()
        };
        let args = strings(&cmd);
        let joined = args.join(" ");
        assert!(joined.starts_with(
            "-y -f rawvideo -vcodec rawvideo -pixel_format rgba -colorspace bt709 \
             -video_size 640x360 -framerate 60 -loglevel warning -i -"
        ));
        assert!(joined.ends_with("-pix_fmt yuv420p out.mp4"));
    }

    #[test]
    fn fractional_frame_rate_is_kept() {
        let cmd = EncoderCommand {
            frame_rate: 29.97,
            ..Default::default()
        };
        assert!(strings(&cmd).contains(&"29.97".to_string()));
    }

    #[test]
    fn explicit_extension_is_not_overridden() {
        let cmd = EncoderCommand {
            preset: EncoderPreset::ProRes4444,
            output: PathBuf::from("take.mkv"),
            ..Default::default()
        };
        assert_eq!(cmd.output_path(), PathBuf::from("take.mkv"));

        let cmd = EncoderCommand {
            preset: EncoderPreset::ProRes4444,
            output: PathBuf::from("take"),
            ..Default::default()
        };
        assert_eq!(cmd.output_path(), PathBuf::from("take.mov"));
    }

    #[test]
    fn every_preset_has_suffix_and_options() {
        for preset in EncoderPreset::ALL {
            assert!(preset.suffix().starts_with('.'));
            assert!(!preset.options().is_empty(), "{preset:?}");
            assert!(!preset.display_name().is_empty());
        }
    }

    #[test]
    fn missing_executable_is_reported() {
        let cmd = EncoderCommand {
            executable: "framepipe-definitely-not-installed".into(),
            ..Default::default()
        };
        assert!(matches!(cmd.resolve(), Err(PipeError::ExecutableNotFound(_))));
    }
}
