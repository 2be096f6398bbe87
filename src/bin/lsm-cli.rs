use anyhow::Result;
use clap::{Parser, ValueEnum};
use lsm::config::{CompactionType, Config};
use lsm::LsmController;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, ValueEnum)]
enum CompactionStrategy {
    Size,
    Leveled,
}

#[derive(Debug)]
enum Command {
    Init { begin: u64, end: u64 },
    Put { key: String, value: String },
    Del { key: String },
    Get { key: String },
    Scan { lower: Option<String>, upper: Option<String> },
    Prefix { prefix: String },
    Flush,
    Compact,
    Dump,
    Quit,
}

impl Command {
    /// Parses one REPL line with `nom`.
    fn parse(input: &str) -> Result<Self> {
        use nom::branch::alt;
        use nom::bytes::complete::{tag_no_case, take_till1};
        use nom::character::complete::{digit1, space1};
        use nom::combinator::{map, map_res, opt};
        use nom::sequence::tuple;

        let uint = |i| {
            map_res(digit1::<&str, nom::error::Error<_>>, |s: &str| {
                s.parse()
                    .map_err(|_| nom::error::Error::new(s, nom::error::ErrorKind::Digit))
            })(i)
        };

        let string = |i| {
            map(take_till1(|c: char| c.is_whitespace()), |s: &str| {
                s.to_string()
            })(i)
        };

        let init = |i| {
            map(
                tuple((tag_no_case("init"), space1, uint, space1, uint)),
                |(_, _, begin, _, end)| Command::Init { begin, end },
            )(i)
        };

        let put = |i| {
            map(
                tuple((tag_no_case("put"), space1, string, space1, string)),
                |(_, _, key, _, value)| Command::Put { key, value },
            )(i)
        };

        let del = |i| {
            map(tuple((tag_no_case("del"), space1, string)), |(_, _, key)| {
                Command::Del { key }
            })(i)
        };

        let get = |i| {
            map(tuple((tag_no_case("get"), space1, string)), |(_, _, key)| {
                Command::Get { key }
            })(i)
        };

        let scan = |i| {
            map(
                tuple((
                    tag_no_case("scan"),
                    opt(tuple((space1, string, space1, string))),
                )),
                |(_, opt_args)| {
                    let (lower, upper) = opt_args.map_or((None, None), |(_, lower, _, upper)| {
                        (Some(lower), Some(upper))
                    });
                    Command::Scan { lower, upper }
                },
            )(i)
        };

        let prefix = |i| {
            map(
                tuple((tag_no_case("prefix"), space1, string)),
                |(_, _, prefix)| Command::Prefix { prefix },
            )(i)
        };

        let command = |i| {
            alt((
                init,
                put,
                del,
                get,
                scan,
                prefix,
                map(tag_no_case("flush"), |_| Command::Flush),
                map(tag_no_case("compact"), |_| Command::Compact),
                map(tag_no_case("dump"), |_| Command::Dump),
                map(tag_no_case("quit"), |_| Command::Quit),
            ))(i)
        };

        command(input.trim())
            .map(|(_, c)| c)
            .map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// An upper sentinel outside any realistic key's range, used for
/// unbounded `scan` with no explicit upper key.
const SCAN_UPPER_SENTINEL: &str = "\u{10FFFF}";

struct ReplHandler {
    lsm: Arc<LsmController>,
}

impl ReplHandler {
    fn handle(&mut self, command: &Command) -> Result<()> {
        match command {
            Command::Init { begin, end } => {
                assert!(*begin <= *end);
                let mut success_count = 0;
                for i in *begin..=*end {
                    let key = i.to_string();
                    let value = format!("value{i}");
                    match self.lsm.put(&key, value.into_bytes()) {
                        Ok(()) => success_count += 1,
                        Err(e) => println!("error inserting key {key}: {e:?}"),
                    }
                }
                println!("{success_count} values filled");
            }
            Command::Put { key, value } => {
                self.lsm.put(key, value.clone().into_bytes())?;
                println!("put {key}={value}");
            }
            Command::Del { key } => {
                let existed = self.lsm.delete(key)?;
                println!("{key} deleted (existed={existed})");
            }
            Command::Get { key } => match self.lsm.get(key)? {
                Some(record) => println!("{key}={:?}", String::from_utf8_lossy(&record.value)),
                None => println!("{key} not found"),
            },
            Command::Scan { lower, upper } => {
                let start = lower.clone().unwrap_or_default();
                let end = upper.clone().unwrap_or_else(|| SCAN_UPPER_SENTINEL.to_string());
                let records = self.lsm.range_scan(&start, &end, usize::MAX, 0)?;
                for record in &records {
                    println!("{}={:?}", record.key, String::from_utf8_lossy(&record.value));
                }
                println!("{} keys scanned", records.len());
            }
            Command::Prefix { prefix } => {
                let records = self.lsm.prefix_scan(prefix, usize::MAX, 0)?;
                for record in &records {
                    println!("{}={:?}", record.key, String::from_utf8_lossy(&record.value));
                }
                println!("{} keys scanned", records.len());
            }
            Command::Flush => {
                self.lsm.persist()?;
                println!("flushed");
            }
            Command::Compact => {
                let did = self.lsm.compact_once()?;
                println!("compaction {}", if did { "ran" } else { "had nothing to do" });
            }
            Command::Dump => {
                println!("memtable generations: {}", self.lsm.memtable_generation_count());
                for (level, ids) in self.lsm.levels_snapshot().iter().enumerate() {
                    println!("level {level}: {ids:?}");
                }
                println!("data_lost: {}", self.lsm.is_data_lost());
            }
            Command::Quit => {}
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "lsm.db")]
    path: PathBuf,
    #[arg(long, default_value = "size")]
    compaction: CompactionStrategy,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = Config {
        lsm_path: args.path.to_string_lossy().to_string(),
        compaction_type: match args.compaction {
            CompactionStrategy::Size => CompactionType::Size,
            CompactionStrategy::Leveled => CompactionType::Leveled,
        },
        ..Config::default()
    }
    .with_env_overrides();

    let lsm = Arc::new(LsmController::open(config)?);
    if lsm.is_data_lost() {
        println!("warning: manifest was unreadable, starting from an empty level map");
    }

    let mut handler = ReplHandler { lsm: lsm.clone() };
    let mut editor = DefaultEditor::new()?;
    loop {
        let line = match editor.readline("lsm-cli> ") {
            Ok(line) => line,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(c) => c,
            Err(e) => {
                println!("parse error: {e}");
                continue;
            }
        };
        let is_quit = matches!(command, Command::Quit);
        if let Err(e) = handler.handle(&command) {
            println!("error: {e}");
        }
        if is_quit {
            break;
        }
    }
    lsm.persist()?;
    Ok(())
}
