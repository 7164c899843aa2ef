use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "weighlog", version, about = "Capture and label load-cell weight readings")]
pub struct ArgsParser {
    #[arg(
        long,
        global = true,
        help = "directory holding the record database and settings (default: $WEIGHLOG_DATA_DIR or ~/.weighlog)"
    )]
    pub data_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// list serial ports that look usable
    Ports,
    /// connect and print every weight reading until Ctrl-C
    Monitor {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// connect, wait for a reading, and save it under a category
    Capture {
        #[arg(long, short, help = "label for the record, e.g. \"Caja 1\"")]
        category: String,
        #[arg(
            long,
            default_value_t = 10,
            help = "seconds to wait for the first reading before giving up"
        )]
        wait_secs: u64,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// review and edit saved records
    Records {
        #[command(subcommand)]
        cmd: RecordsCmd,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct LinkArgs {
    #[arg(long, short, help = "serial device, e.g. /dev/ttyUSB0 or COM3 (asks when omitted)")]
    pub port: Option<String>,
    #[arg(long, short, help = "baud rate (default 57600)")]
    pub baud: Option<u32>,
    #[arg(long, help = "end the session after this many seconds without data")]
    pub idle_timeout_secs: Option<u64>,
    #[arg(long, help = "remember --port, --baud and --idle-timeout-secs as defaults")]
    pub save: bool,
}

#[derive(Subcommand, Debug)]
pub enum RecordsCmd {
    /// show all records, newest first
    List {
        #[arg(long, help = "print JSON instead of a table")]
        json: bool,
    },
    /// replace the weight and category of a record
    Update {
        id: String,
        #[arg(long, short)]
        weight: f64,
        #[arg(long, short)]
        category: String,
    },
    /// delete one record
    Delete { id: String },
    /// delete every record
    Clear {
        #[arg(long, help = "confirm deleting all records")]
        yes: bool,
    },
    /// write all records as JSON (stdout when no file is given)
    Export { file: Option<PathBuf> },
    /// add records from a JSON export, skipping ids already stored
    Import { file: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_arguments_parse() {
        let args = ArgsParser::try_parse_from([
            "weighlog",
            "--data-dir",
            "/tmp/w",
            "capture",
            "-c",
            "Caja 1",
            "--port",
            "/dev/ttyUSB0",
        ])
        .unwrap();

        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/w")));
        match args.cmd {
            Cmd::Capture {
                category,
                wait_secs,
                link,
            } => {
                assert_eq!(category, "Caja 1");
                assert_eq!(wait_secs, 10);
                assert_eq!(link.port.as_deref(), Some("/dev/ttyUSB0"));
                assert_eq!(link.baud, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn negative_weight_edit_parses() {
        let args = ArgsParser::try_parse_from([
            "weighlog", "records", "update", "abc", "--weight=-1.5", "-c", "tare",
        ])
        .unwrap();
        assert!(matches!(
            args.cmd,
            Cmd::Records {
                cmd: RecordsCmd::Update { weight, .. }
            } if weight == -1.5
        ));
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        ArgsParser::command().debug_assert();
    }
}
