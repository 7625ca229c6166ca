mod bench;
mod transcript;

use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use bench::Bench;
use node_core::CycleReport;
use transcript::{TranscriptLogger, TranscriptRole};

const USAGE: &str = "Usage: node-emulator [--scenario <cold|warm|absent-sensor|clock-sync-fail>] \
                     [--cycles <n>] [--transcript <path>]";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scenario {
    /// Factory-fresh board: defaults, join, clock sync, uplink.
    Cold,
    /// One cold boot, then timer wakes that restore the session.
    Warm,
    /// One configured sensor does not answer.
    AbsentSensor,
    /// The network never answers the first cycle's time requests.
    ClockSyncFail,
}

impl Scenario {
    fn from_tag(tag: &str) -> Result<Self, String> {
        match tag.to_ascii_lowercase().as_str() {
            "cold" => Ok(Self::Cold),
            "warm" => Ok(Self::Warm),
            "absent-sensor" => Ok(Self::AbsentSensor),
            "clock-sync-fail" => Ok(Self::ClockSyncFail),
            _ => Err(format!("Unknown scenario `{tag}`")),
        }
    }

    fn header(self) -> &'static str {
        match self {
            Scenario::Cold => "Field node emulator: cold boot",
            Scenario::Warm => "Field node emulator: warm wakes",
            Scenario::AbsentSensor => "Field node emulator: absent sensor",
            Scenario::ClockSyncFail => "Field node emulator: clock sync failure",
        }
    }

    fn default_cycles(self) -> u32 {
        match self {
            Scenario::Cold | Scenario::AbsentSensor => 1,
            Scenario::Warm => 3,
            Scenario::ClockSyncFail => 2,
        }
    }
}

struct Options {
    scenario: Scenario,
    cycles: Option<u32>,
    transcript: Option<PathBuf>,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });

    let scenario = options.scenario;
    let mut logger = TranscriptLogger::new(options.transcript.as_deref(), scenario.header())?;
    let mut bench = Bench::factory_new();

    let mut cycles = options.cycles.unwrap_or_else(|| scenario.default_cycles());
    match scenario {
        Scenario::Cold => {}
        Scenario::Warm => cycles += 1,
        Scenario::AbsentSensor => bench.state().absent_sensors.push(String::from("SH4_1")),
        Scenario::ClockSyncFail => bench.state().answers_time = false,
    }

    for cycle in 1..=cycles {
        logger.append_line(
            bench.state().now_ms,
            TranscriptRole::Bench,
            &format!("boot {cycle}/{cycles}"),
        )?;
        let report = bench.boot();
        for (at, line) in bench.take_lines() {
            logger.append_line(at, TranscriptRole::Node, &line)?;
        }
        let at = bench.state().now_ms;
        for line in summarize(&report) {
            logger.append_line(at, TranscriptRole::Bench, &line)?;
        }

        if scenario == Scenario::ClockSyncFail {
            // Later cycles see a network that answers.
            bench.state().answers_time = true;
        }
    }

    Ok(())
}

fn summarize(report: &CycleReport) -> Vec<String> {
    let mut lines = vec![format!(
        "outcome={:?} wake={:?} boot_count={} config={:?}",
        report.outcome, report.wake, report.boot_count, report.config_source
    )];
    if let Some(session) = report.session {
        lines.push(format!("session={session:?}"));
    }
    lines.push(format!(
        "sensors initialized={} failed={}",
        report.begin.initialized, report.begin.failed
    ));
    if let Some(payload) = &report.payload {
        let text = core::str::from_utf8(payload.as_bytes()).unwrap_or("<invalid utf-8>");
        let marker = if payload.truncated { " (truncated)" } else { "" };
        lines.push(format!("payload[{}]{}: {}", payload.len(), marker, text));
    }
    match report.sleep_s {
        Some(seconds) => lines.push(format!("deep sleep for {seconds}s")),
        None => lines.push(String::from("config mode; no sleep armed")),
    }
    lines
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        scenario: Scenario::Cold,
        cycles: None,
        transcript: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| format!("Expected value after {flag}"))
        };
        match flag.as_str() {
            "--scenario" => options.scenario = Scenario::from_tag(&value()?)?,
            "--cycles" => {
                let raw = value()?;
                let cycles = raw
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid cycle count `{raw}`"))?;
                if cycles == 0 {
                    return Err(String::from("--cycles must be at least 1"));
                }
                options.cycles = Some(cycles);
            }
            "--transcript" => options.transcript = Some(PathBuf::from(value()?)),
            other => return Err(format!("Unknown argument `{other}`")),
        }
    }

    Ok(options)
}
