//! Pattern values: the query contract the session runtime consumes
//!
//! A pattern is an immutable function from a time span to the events
//! ("haps") active within it. The pattern language that builds these values
//! lives outside this crate; this module only carries what the session needs
//! to hold, merge, tag and query them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Denominator used when converting floating point cycle positions.
const FLOAT_DENOMINATOR: i64 = 1_000_000;

/// Fraction type for rational time values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fraction {
    pub numerator: i64,
    pub denominator: i64,
}

impl Fraction {
    pub fn new(n: i64, d: i64) -> Self {
        let divisor = gcd(n.abs(), d.abs()).max(1);
        Self {
            numerator: n / divisor * d.signum(),
            denominator: d.abs() / divisor,
        }
    }

    pub fn from_integer(n: i64) -> Self {
        Self {
            numerator: n,
            denominator: 1,
        }
    }

    /// Nearest fraction with a denominator dividing one million.
    pub fn from_float(f: f64) -> Self {
        let numerator = (f * FLOAT_DENOMINATOR as f64).round() as i64;
        Self::new(numerator, FLOAT_DENOMINATOR)
    }

    pub fn to_float(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Start of the cycle containing this time.
    pub fn sam(&self) -> Fraction {
        Fraction::from_integer(self.numerator.div_euclid(self.denominator))
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Fraction::from_integer(0)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.denominator == 1 {
            write!(f, "{}", self.numerator)
        } else {
            write!(f, "{}/{}", self.numerator, self.denominator)
        }
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl std::ops::Add for Fraction {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator + other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }
}

impl std::ops::Sub for Fraction {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Fraction::new(
            self.numerator * other.denominator - other.numerator * self.denominator,
            self.denominator * other.denominator,
        )
    }
}

impl std::cmp::PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Fraction {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Widen to avoid overflow on large denominators
        let lhs = self.numerator as i128 * other.denominator as i128;
        let rhs = other.numerator as i128 * self.denominator as i128;
        lhs.cmp(&rhs)
    }
}

/// TimeSpan represents a half-open time interval `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSpan {
    pub begin: Fraction,
    pub end: Fraction,
}

impl TimeSpan {
    pub fn new(begin: Fraction, end: Fraction) -> Self {
        Self { begin, end }
    }

    pub fn from_floats(begin: f64, end: f64) -> Self {
        Self::new(Fraction::from_float(begin), Fraction::from_float(end))
    }

    pub fn duration(&self) -> Fraction {
        self.end - self.begin
    }

    /// Overlap with another span, if they share any time.
    pub fn intersection(&self, other: &TimeSpan) -> Option<TimeSpan> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        (begin < end).then(|| TimeSpan::new(begin, end))
    }
}

/// Hap (short for "happening") is an event with a value
///
/// `whole` is the full active interval of the event; `part` is the fragment
/// that fell inside the query. A hap without a `whole` has no defined begin.
#[derive(Debug, Clone)]
pub struct Hap<T> {
    pub whole: Option<TimeSpan>,
    pub part: TimeSpan,
    pub value: T,
    pub context: HashMap<String, String>,
}

impl<T: Clone> Hap<T> {
    pub fn new(whole: Option<TimeSpan>, part: TimeSpan, value: T) -> Self {
        Self {
            whole,
            part,
            value,
            context: HashMap::new(),
        }
    }

    pub fn with_value<U>(&self, f: impl FnOnce(&T) -> U) -> Hap<U> {
        Hap {
            whole: self.whole,
            part: self.part,
            value: f(&self.value),
            context: self.context.clone(),
        }
    }

    /// True if this fragment contains the start of its event.
    pub fn has_onset(&self) -> bool {
        self.whole.map_or(false, |whole| whole.begin == self.part.begin)
    }

    /// True if `time` lies inside the closed active interval.
    pub fn is_active_at(&self, time: Fraction) -> bool {
        self.whole
            .map_or(false, |whole| whole.begin <= time && time <= whole.end)
    }
}

/// State for pattern queries
#[derive(Debug, Clone)]
pub struct State {
    pub span: TimeSpan,
    pub controls: HashMap<String, f64>,
}

impl State {
    pub fn new(span: TimeSpan) -> Self {
        Self {
            span,
            controls: HashMap::new(),
        }
    }
}

/// Payload carried by session patterns: usually an object of controls.
pub type Value = serde_json::Value;

/// The pattern values documents evaluate to.
pub type ControlPattern = Pattern<Value>;

type QueryFn<T> = dyn Fn(&State) -> Vec<Hap<T>> + Send + Sync;

/// A queryable timeline. Cloning is cheap; clones share the query function.
pub struct Pattern<T: Clone + Send + Sync> {
    query: Arc<QueryFn<T>>,
}

impl<T: Clone + Send + Sync> fmt::Debug for Pattern<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("query", &"<closure>")
            .finish()
    }
}

impl<T: Clone + Send + Sync> Clone for Pattern<T> {
    fn clone(&self) -> Self {
        Self {
            query: self.query.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Pattern<T> {
    /// Create a new pattern from a query function
    pub fn new(query: impl Fn(&State) -> Vec<Hap<T>> + Send + Sync + 'static) -> Self {
        Self {
            query: Arc::new(query),
        }
    }

    pub fn query(&self, state: &State) -> Vec<Hap<T>> {
        (self.query)(state)
    }

    /// Query with plain cycle positions.
    pub fn query_arc(&self, begin: f64, end: f64) -> Vec<Hap<T>> {
        self.query(&State::new(TimeSpan::from_floats(begin, end)))
    }

    /// The empty pattern.
    pub fn silence() -> Self {
        Self::new(|_| Vec::new())
    }

    /// One event per cycle carrying `value`.
    pub fn pure(value: T) -> Self {
        Self::sequence(vec![value])
    }

    /// `values` spread evenly across every cycle.
    pub fn sequence(values: Vec<T>) -> Self {
        if values.is_empty() {
            return Self::silence();
        }

        let steps = values.len() as i64;
        Self::new(move |state| {
            let mut haps = Vec::new();
            let mut cycle = state.span.begin.sam();

            while cycle < state.span.end {
                for (i, value) in values.iter().enumerate() {
                    let begin = cycle + Fraction::new(i as i64, steps);
                    let end = cycle + Fraction::new(i as i64 + 1, steps);
                    let whole = TimeSpan::new(begin, end);

                    if let Some(part) = whole.intersection(&state.span) {
                        haps.push(Hap::new(Some(whole), part, value.clone()));
                    }
                }
                cycle = cycle + Fraction::from_integer(1);
            }
            haps
        })
    }

    /// Layer patterns on top of each other (play simultaneously)
    pub fn stack(patterns: Vec<Pattern<T>>) -> Pattern<T> {
        match patterns.len() {
            0 => Pattern::silence(),
            1 => patterns.into_iter().next().unwrap_or_else(Pattern::silence),
            _ => Pattern::new(move |state| patterns.iter().flat_map(|p| p.query(state)).collect()),
        }
    }

    /// Transform the values in a pattern
    pub fn fmap<U: Clone + Send + Sync + 'static>(
        self,
        f: impl Fn(T) -> U + Send + Sync + 'static,
    ) -> Pattern<U> {
        let f = Arc::new(f);
        Pattern::new(move |state| {
            self.query(state)
                .into_iter()
                .map(|hap| hap.with_value(|v| f(v.clone())))
                .collect()
        })
    }

    /// Record `key = value` in the context of every hap.
    pub fn with_context(self, key: &str, value: &str) -> Pattern<T> {
        let key = key.to_string();
        let value = value.to_string();
        Pattern::new(move |state| {
            let mut haps = self.query(state);
            for hap in &mut haps {
                hap.context.insert(key.clone(), value.clone());
            }
            haps
        })
    }
}
