//! Line runtime
//!
//! A tiny pattern language, one statement per line, used by the command line
//! player and the tests in place of a full pattern language:
//!
//! ```text
//! // comments run to the end of the line
//! setcps 0.75            tempo in cycles per second (setcpm for per minute)
//! drums: bd ~ sn:2 bd    bind a named voice; `~` is a rest, `:n` picks a sample
//! $: hh hh hh            bind an anonymous voice
//! _bass: c2 e2           muted voice
//! all gain 0.8           set `gain` on every event of the document
//! bd cp .q               unlabeled line: the document's result, `.q` mutes it
//! 42                     a plain number is a result that is not a pattern
//! hush                   drop everything bound so far
//! ```
//!
//! Each word of a step sequence divides the cycle evenly.

use serde_json::{json, Map, Number};

use crate::error::EvalError;
use crate::eval::{EvalScope, Evaluated, MiniLocation, PatternRuntime, ReturnValue};
use crate::pattern::{ControlPattern, Pattern, Value};
use crate::scheduler::BoxFuture;

const COMMENT: &str = "//";
const REST: &str = "~";
const MUTE_SUFFIX: &str = ".q";

#[derive(Debug, Default, Clone, Copy)]
pub struct LineRuntime;

impl PatternRuntime for LineRuntime {
    fn evaluate<'a>(
        &'a self,
        code: &'a str,
        scope: &'a mut EvalScope<'_>,
    ) -> BoxFuture<'a, Result<Evaluated, EvalError>> {
        Box::pin(std::future::ready(run(code, scope)))
    }
}

/// One word of a line with its byte offset in the whole source.
#[derive(Debug, Clone, Copy)]
struct Word<'a> {
    text: &'a str,
    start: usize,
}

impl Word<'_> {
    fn location(&self) -> MiniLocation {
        MiniLocation::new(self.start, self.start + self.text.len())
    }
}

fn run(code: &str, scope: &mut EvalScope<'_>) -> Result<Evaluated, EvalError> {
    let mut result = ReturnValue::Undefined;
    let mut mini_locations = Vec::new();

    let mut offset = 0;
    for (index, raw_line) in code.split('\n').enumerate() {
        let line_start = offset;
        offset += raw_line.len() + 1;

        let line = match raw_line.find(COMMENT) {
            Some(pos) => &raw_line[..pos],
            None => raw_line,
        };
        let words = split_words(line, line_start);
        let Some((first, rest)) = words.split_first() else {
            continue;
        };
        let line_no = index + 1;

        match first.text {
            "setcps" => scope.set_cps(number_arg(rest, line_no)?)?,
            "setcpm" => scope.set_cpm(number_arg(rest, line_no)?)?,
            "hush" => {
                scope.hush();
            }
            "all" => {
                let (key, value) = control_arg(rest, line_no)?;
                scope.all(move |pattern| set_control(pattern, key.clone(), value.clone()));
            }
            label if label.len() > 1 && label.ends_with(':') => {
                let name = &label[..label.len() - 1];
                let (steps, muted) = strip_mute(rest);
                let pattern = steps_pattern(steps, line_no, &mut mini_locations)?;
                if muted {
                    scope.mute(pattern);
                } else {
                    scope.bind(name, pattern);
                }
            }
            _ => {
                if let (Ok(number), true) = (first.text.parse::<f64>(), rest.is_empty()) {
                    result = ReturnValue::Value(json!(number));
                    continue;
                }
                let (steps, muted) = strip_mute(&words);
                let pattern = steps_pattern(steps, line_no, &mut mini_locations)?;
                result = ReturnValue::Pattern(if muted {
                    scope.mute(pattern)
                } else {
                    pattern
                });
            }
        }
    }

    Ok(Evaluated {
        result,
        mini_locations,
    })
}

fn split_words(line: &str, line_start: usize) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut start = None;
    for (pos, ch) in line.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(begin)) => {
                words.push(Word {
                    text: &line[begin..pos],
                    start: line_start + begin,
                });
                start = None;
            }
            (false, None) => start = Some(pos),
            _ => {}
        }
    }
    if let Some(begin) = start {
        words.push(Word {
            text: &line[begin..],
            start: line_start + begin,
        });
    }
    words
}

fn strip_mute<'w, 'a>(words: &'w [Word<'a>]) -> (&'w [Word<'a>], bool) {
    match words.split_last() {
        Some((last, steps)) if last.text == MUTE_SUFFIX => (steps, true),
        _ => (words, false),
    }
}

fn number_arg(args: &[Word<'_>], line_no: usize) -> Result<f64, EvalError> {
    match args {
        [value] => value.text.parse::<f64>().map_err(|_| {
            EvalError::Runtime(format!("line {}: expected a number, got {:?}", line_no, value.text))
        }),
        _ => Err(EvalError::Runtime(format!(
            "line {}: expected exactly one number",
            line_no
        ))),
    }
}

fn control_arg(args: &[Word<'_>], line_no: usize) -> Result<(String, Value), EvalError> {
    match args {
        [key, value] => {
            let number = value.text.parse::<f64>().ok().and_then(Number::from_f64);
            let value = number.map_or_else(|| json!(value.text), Value::Number);
            Ok((key.text.to_string(), value))
        }
        _ => Err(EvalError::Runtime(format!(
            "line {}: `all` expects a control name and a value",
            line_no
        ))),
    }
}

fn set_control(pattern: ControlPattern, key: String, value: Value) -> ControlPattern {
    pattern.fmap(move |mut payload| {
        if let Value::Object(controls) = &mut payload {
            controls.insert(key.clone(), value.clone());
        }
        payload
    })
}

/// Parse one word of a step sequence; `None` for a rest.
fn step(word: &Word<'_>, line_no: usize) -> Result<Option<Value>, EvalError> {
    if word.text == REST {
        return Ok(None);
    }

    let valid = |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.' | '#' | ':');
    if let Some(bad) = word.text.chars().find(|ch| !valid(*ch)) {
        return Err(EvalError::Runtime(format!(
            "line {}: unexpected character {:?} in {:?}",
            line_no, bad, word.text
        )));
    }

    let mut controls = Map::new();
    match word.text.split_once(':') {
        Some((sound, index)) => {
            let n = index.parse::<u64>().map_err(|_| {
                EvalError::Runtime(format!(
                    "line {}: sample index must be a whole number in {:?}",
                    line_no, word.text
                ))
            })?;
            controls.insert("s".to_string(), json!(sound));
            controls.insert("n".to_string(), json!(n));
        }
        None => {
            controls.insert("s".to_string(), json!(word.text));
        }
    }
    Ok(Some(Value::Object(controls)))
}

fn steps_pattern(
    words: &[Word<'_>],
    line_no: usize,
    mini_locations: &mut Vec<MiniLocation>,
) -> Result<ControlPattern, EvalError> {
    let mut steps = Vec::with_capacity(words.len());
    for word in words {
        let parsed = step(word, line_no)?;
        if parsed.is_some() {
            mini_locations.push(word.location());
        }
        steps.push(parsed);
    }

    let sequence = Pattern::sequence(steps);
    Ok(Pattern::new(move |state| {
        sequence
            .query(state)
            .into_iter()
            .filter_map(|hap| {
                let value = hap.value.clone()?;
                Some(hap.with_value(|_| value))
            })
            .collect()
    }))
}
