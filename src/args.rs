use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Estimator;

#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Parametric speech analysis and resynthesis.")]
#[command(args_conflicts_with_subcommands = true)]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub resynth: ResynthArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print frame count, FFT size and voiced ratio of an input file.
    Info {
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ResynthArgs {
    /// Audio file to analyse.
    pub input: Option<PathBuf>,
    /// WAV file to write.
    pub output: Option<PathBuf>,
    /// KDL analysis config. Defaults to the user config file when present.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long, value_parser = parse_estimator)]
    pub estimator: Option<Estimator>,
    /// Frame period in milliseconds.
    #[arg(long)]
    pub frame_period: Option<f64>,
    /// Modification flags, e.g. `t-3g20B40`.
    #[arg(long, default_value = "")]
    pub flags: String,
}

fn parse_estimator(s: &str) -> Result<Estimator, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resynth_arguments() {
        let cli = Cli::try_parse_from([
            "parvoc",
            "in.wav",
            "out.wav",
            "--estimator",
            "harvest",
            "--frame-period",
            "2.5",
            "--flags",
            "t-3",
        ])
        .unwrap();
        assert!(cli.command.is_none());
        let args = cli.resynth;
        assert_eq!(args.input, Some(PathBuf::from("in.wav")));
        assert_eq!(args.output, Some(PathBuf::from("out.wav")));
        assert_eq!(args.estimator, Some(Estimator::Harvest));
        assert_eq!(args.frame_period, Some(2.5));
        assert_eq!(args.flags, "t-3");
    }

    #[test]
    fn test_info_subcommand() {
        let cli = Cli::try_parse_from(["parvoc", "info", "voice.flac"]).unwrap();
        match cli.command {
            Some(Commands::Info { input, config }) => {
                assert_eq!(input, PathBuf::from("voice.flac"));
                assert!(config.is_none());
            }
            None => panic!("expected info subcommand"),
        }
    }

    #[test]
    fn test_rejects_unknown_estimator() {
        assert!(Cli::try_parse_from(["parvoc", "a.wav", "b.wav", "--estimator", "yin"]).is_err());
    }
}
