//! ffmpeg invocation assembly.
//!
//! Pure data-driven flag construction folded over the configured quality
//! tiers, so the mapping is testable without spawning a process. The encoder
//! reads the raw stream from stdin (`pipe:0`); its own back-pressure
//! throttles the upstream reader.

use std::path::Path;

use livebeam_core::config::FfmpegConfig;

/// A fully assembled encoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    pub binary: String,
    pub args: Vec<String>,
}

/// Build the encoder invocation for one publish session.
///
/// Per tier: one video output mapping carrying resolution, frame rate, max
/// bitrate, buffer size, GOP size (`fps × hls_time`) and key-frame interval
/// (`hls_time`), plus one audio mapping and one `var_stream_map` entry
/// pairing the two. Output is one sub-playlist per tier beneath
/// `<root>/<publishName>/<tierIndex>/` plus the master playlist.
#[must_use]
pub fn build(config: &FfmpegConfig, output_root: &Path, publish_name: &str) -> FfmpegCommand {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-re".into(),
        "-i".into(),
        "pipe:0".into(),
        "-preset".into(),
        config.preset.clone(),
        "-sc_threshold".into(),
        "0".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-crf".into(),
        config.crf.to_string(),
    ];

    let mut stream_maps = Vec::with_capacity(config.qualities.len());
    for (index, tier) in config.qualities.iter().enumerate() {
        let gop = tier.fps * config.hls_time;
        args.extend([
            "-map".into(),
            "v:0".into(),
            format!("-s:{index}"),
            tier.resolution.clone(),
            format!("-r:{index}"),
            tier.fps.to_string(),
            format!("-maxrate:{index}"),
            tier.max_bitrate.clone(),
            format!("-bufsize:{index}"),
            tier.buf_size.clone(),
            format!("-g:{index}"),
            gop.to_string(),
            format!("-keyint_min:{index}"),
            config.hls_time.to_string(),
        ]);
        stream_maps.push(format!("v:{index},a:{index}"));
    }
    for _ in &config.qualities {
        args.extend(["-map".into(), "a:0".into()]);
    }

    args.extend([
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-ac".into(),
        "1".into(),
        "-ar".into(),
        "44100".into(),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        config.hls_time.to_string(),
        "-hls_delete_threshold".into(),
        (config.hls_max_size - config.hls_list_size).to_string(),
        "-hls_list_size".into(),
        config.hls_list_size.to_string(),
        "-hls_flags".into(),
        "delete_segments".into(),
        "-master_pl_name".into(),
        config.master_file_name.clone(),
        "-var_stream_map".into(),
        stream_maps.join(" "),
    ]);

    args.push(
        output_root
            .join(publish_name)
            .join("%v")
            .join("stream.m3u8")
            .to_string_lossy()
            .into_owned(),
    );

    FfmpegCommand {
        binary: config.ffmpeg_path.clone(),
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn per_tier_flags_are_derived_from_config() {
        let config = FfmpegConfig::default();
        let command = build(&config, &PathBuf::from("/hls/private"), "alice");

        assert_eq!(command.binary, "ffmpeg");
        assert_eq!(flag_value(&command.args, "-s:0"), Some("1280x720"));
        assert_eq!(flag_value(&command.args, "-s:1"), Some("854x480"));
        assert_eq!(flag_value(&command.args, "-maxrate:1"), Some("1500k"));
        // GOP = fps × segment duration, key-frame interval = segment duration
        assert_eq!(flag_value(&command.args, "-g:0"), Some("120"));
        assert_eq!(flag_value(&command.args, "-keyint_min:0"), Some("4"));
    }

    #[test]
    fn variant_map_pairs_each_video_tier_with_audio() {
        let config = FfmpegConfig::default();
        let command = build(&config, &PathBuf::from("/hls/private"), "alice");

        assert_eq!(
            flag_value(&command.args, "-var_stream_map"),
            Some("v:0,a:0 v:1,a:1")
        );
        let audio_maps = command.args.iter().filter(|a| *a == "a:0").count();
        assert_eq!(audio_maps, config.qualities.len());
    }

    #[test]
    fn retention_flags_bound_disk_usage() {
        let config = FfmpegConfig::default();
        let command = build(&config, &PathBuf::from("/hls/private"), "alice");

        assert_eq!(flag_value(&command.args, "-hls_list_size"), Some("6"));
        assert_eq!(flag_value(&command.args, "-hls_delete_threshold"), Some("4"));
        assert!(command.args.contains(&"delete_segments".to_string()));
    }

    #[test]
    fn output_template_lands_under_the_publish_directory() {
        let config = FfmpegConfig::default();
        let command = build(&config, &PathBuf::from("/hls/private"), "alice");

        let output = command.args.last().unwrap();
        assert!(output.ends_with("alice/%v/stream.m3u8"));
    }

    #[test]
    fn reads_from_stdin_pipe() {
        let config = FfmpegConfig::default();
        let command = build(&config, &PathBuf::from("/hls/private"), "alice");
        assert_eq!(flag_value(&command.args, "-i"), Some("pipe:0"));
    }
}
