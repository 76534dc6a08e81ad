//! User scripts
//!
//! A small line-oriented language for choreographing the rig:
//!
//! ```text
//! # warm up
//! brightness 20
//! repeat 3
//!   frequency 800
//!   wait 500
//!   note A4 250
//! end
//! frequency 0
//! ```
//!
//! Scripts can only move the two controls, wait, and play notes. Running
//! one claims the shared [`Performer`], so scripts and songs never overlap.

use crate::key::ControlKey;
use crate::notes::note_frequency;
use crate::perform::{outcome_of, Performance, PerformanceOutcome, Performer};
use crate::Error;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Script failures
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// The source does not parse
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The script failed while running
    #[error(transparent)]
    Runtime(#[from] Error),
}

impl ScriptError {
    fn parse(line: usize, message: impl Into<String>) -> Self {
        ScriptError::Parse {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Set { key: ControlKey, value: i32 },
    Wait(Duration),
    Note { name: String, duration: Duration },
    Repeat { count: u32, body: Vec<ScriptCommand> },
}

/// A parsed script
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    commands: Vec<ScriptCommand>,
}

impl Script {
    pub fn commands(&self) -> &[ScriptCommand] {
        &self.commands
    }

    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        // Open blocks: (line of `repeat`, count, commands collected so far)
        let mut stack: Vec<(usize, u32, Vec<ScriptCommand>)> = Vec::new();
        let mut commands = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let text = raw.split('#').next().unwrap_or_default().trim();
            if text.is_empty() {
                continue;
            }

            let mut words = text.split_whitespace();
            let keyword = words.next().unwrap_or_default().to_ascii_lowercase();
            let args: Vec<&str> = words.collect();

            let command = match keyword.as_str() {
                "brightness" | "frequency" => {
                    let key: ControlKey = keyword
                        .parse()
                        .map_err(|e: Error| ScriptError::parse(line, e.to_string()))?;
                    let value = number::<i32>(line, &args, 0, "value")?;
                    key.check(value)
                        .map_err(|e| ScriptError::parse(line, e.to_string()))?;
                    expect_args(line, &keyword, &args, 1)?;
                    ScriptCommand::Set { key, value }
                }
                "wait" => {
                    let ms = number::<u64>(line, &args, 0, "milliseconds")?;
                    expect_args(line, &keyword, &args, 1)?;
                    ScriptCommand::Wait(Duration::from_millis(ms))
                }
                "note" => {
                    let name = args
                        .first()
                        .ok_or_else(|| ScriptError::parse(line, "note needs a name"))?;
                    if note_frequency(name).is_none() {
                        return Err(ScriptError::parse(line, format!("unknown note '{}'", name)));
                    }
                    let ms = number::<u64>(line, &args, 1, "milliseconds")?;
                    expect_args(line, &keyword, &args, 2)?;
                    ScriptCommand::Note {
                        name: name.to_string(),
                        duration: Duration::from_millis(ms),
                    }
                }
                "repeat" => {
                    let count = number::<u32>(line, &args, 0, "count")?;
                    expect_args(line, &keyword, &args, 1)?;
                    stack.push((line, count, std::mem::take(&mut commands)));
                    continue;
                }
                "end" => {
                    expect_args(line, &keyword, &args, 0)?;
                    let (_, count, outer) = stack
                        .pop()
                        .ok_or_else(|| ScriptError::parse(line, "'end' without 'repeat'"))?;
                    let body = std::mem::replace(&mut commands, outer);
                    ScriptCommand::Repeat { count, body }
                }
                other => {
                    return Err(ScriptError::parse(line, format!("unknown command '{}'", other)));
                }
            };

            commands.push(command);
        }

        if let Some((line, _, _)) = stack.pop() {
            return Err(ScriptError::parse(line, "'repeat' is never closed with 'end'"));
        }

        Ok(Self { commands })
    }

    /// Total time spent in `wait` and `note`, saturating at [`Duration::MAX`]
    pub fn duration(&self) -> Duration {
        fn total(commands: &[ScriptCommand]) -> Duration {
            commands
                .iter()
                .map(|command| match command {
                    ScriptCommand::Set { .. } => Duration::ZERO,
                    ScriptCommand::Wait(d) => *d,
                    ScriptCommand::Note { duration, .. } => *duration,
                    ScriptCommand::Repeat { count, body } => total(body).saturating_mul(*count),
                })
                .fold(Duration::ZERO, Duration::saturating_add)
        }
        total(&self.commands)
    }

    /// Run on `performer`; see [`PerformanceOutcome`]
    pub async fn run(&self, performer: &Performer) -> Result<PerformanceOutcome, ScriptError> {
        let Some(performance) = performer.begin() else {
            return Ok(PerformanceOutcome::AlreadyRunning);
        };

        info!(commands = self.commands.len(), duration = ?self.duration(), "Running script");
        let result = run_block(&self.commands, &performance).await;
        Ok(outcome_of(result)?)
    }
}

impl FromStr for Script {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn run_block<'a>(
    commands: &'a [ScriptCommand],
    performance: &'a Performance,
) -> BoxFuture<'a, crate::Result<()>> {
    async move {
        for command in commands {
            match command {
                ScriptCommand::Set { key, value } => performance.change(*key, *value)?,
                ScriptCommand::Wait(duration) => performance.wait(*duration).await?,
                ScriptCommand::Note { name, duration } => {
                    performance.play_note(name, *duration).await?
                }
                ScriptCommand::Repeat { count, body } => {
                    for _ in 0..*count {
                        run_block(body, performance).await?;
                    }
                }
            }
        }
        Ok(())
    }
    .boxed()
}

fn number<T: FromStr>(
    line: usize,
    args: &[&str],
    index: usize,
    what: &str,
) -> Result<T, ScriptError> {
    let raw = args
        .get(index)
        .ok_or_else(|| ScriptError::parse(line, format!("missing {}", what)))?;
    raw.parse()
        .map_err(|_| ScriptError::parse(line, format!("'{}' is not a valid {}", raw, what)))
}

fn expect_args(line: usize, keyword: &str, args: &[&str], count: usize) -> Result<(), ScriptError> {
    if args.len() > count {
        return Err(ScriptError::parse(
            line,
            format!("'{}' takes {} argument(s), got {}", keyword, count, args.len()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_script() {
        let script = Script::parse(
            "# warm up\n\
             brightness 20\n\
             repeat 2\n\
             \x20 frequency -800   # backwards\n\
             \x20 wait 500\n\
             \x20 note A4 250\n\
             end\n\
             frequency 0\n",
        )
        .unwrap();

        assert_eq!(script.commands().len(), 3);
        assert_eq!(
            script.commands()[0],
            ScriptCommand::Set {
                key: ControlKey::Brightness,
                value: 20
            }
        );
        match &script.commands()[1] {
            ScriptCommand::Repeat { count, body } => {
                assert_eq!(*count, 2);
                assert_eq!(body.len(), 3);
            }
            other => panic!("expected repeat, got {:?}", other),
        }
        assert_eq!(script.duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let err = Script::parse("wait 100\nspin 3\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2: unknown command 'spin'");

        let err = Script::parse("brightness 80").unwrap_err();
        assert_eq!(err.to_string(), "line 1: brightness must be between 0 and 50");

        let err = Script::parse("note H4 100").unwrap_err();
        assert_eq!(err.to_string(), "line 1: unknown note 'H4'");

        let err = Script::parse("wait soon").unwrap_err();
        assert_eq!(err.to_string(), "line 1: 'soon' is not a valid milliseconds");
    }

    #[test]
    fn test_unbalanced_blocks() {
        let err = Script::parse("\nrepeat 2\nwait 10\n").unwrap_err();
        assert_eq!(err.to_string(), "line 2: 'repeat' is never closed with 'end'");

        let err = Script::parse("wait 10\nend").unwrap_err();
        assert_eq!(err.to_string(), "line 2: 'end' without 'repeat'");
    }

    #[test]
    fn test_extra_arguments_rejected() {
        assert!(Script::parse("wait 10 20").is_err());
        assert!(Script::parse("end now").is_err());
    }

    #[test]
    fn test_duration_saturates() {
        let script = Script::parse("repeat 4294967295
wait 18446744073709551615
end
wait 10").unwrap();
        assert_eq!(script.duration(), Duration::MAX);

        let script = Script::parse("repeat 4294967295
wait 1000
end").unwrap();
        assert_eq!(script.duration(), Duration::from_secs(4_294_967_295));
    }

    #[test]
    fn test_empty_script() {
        let script: Script = "# nothing\n\n".parse().unwrap();
        assert!(script.commands().is_empty());
    }
}
