//! Marker record model and wire codec
//!
//! Outgoing paradigm events are serialized to delimited text records for the
//! external signal-processing pipeline; incoming records decode to typed
//! prediction/command values. Decoding never fails: anything unrecognized
//! becomes an [`IncomingMarker::Unparsed`] record so the frame loop is never
//! stalled by malformed external input.
//!
//! Wire grammar (comma separated, no padding):
//!
//! ```text
//! mi,<poolSize>,<target|-1>,<windowLength:2dp>
//! switch,<poolSize>,<target|-1>,<windowLength:2dp>
//! ssvep,<poolSize>,<target|-1>,<windowLength:2dp>[,<freq>]*
//! p300,s,<poolSize>,<target|-1>,<activeIndex>
//! p300,m,<poolSize>,<target|-1>[,<activeIndex>]*
//! ```
//!
//! plus the bare commands `Trial Started`, `Trial Ends`, `Training Complete`,
//! `Update Classifier`, the `ping` keepalive, and the prediction echo (an
//! integer, optionally bracketed or wrapped in a dotted callable such as
//! `np.int64(5)`).

/// Payload-free command markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMarker {
    TrialStarted,
    TrialEnds,
    TrainingComplete,
    UpdateClassifier,
}

impl CommandMarker {
    /// The exact wire text for this command.
    pub fn as_wire(&self) -> &'static str {
        match self {
            CommandMarker::TrialStarted => "Trial Started",
            CommandMarker::TrialEnds => "Trial Ends",
            CommandMarker::TrainingComplete => "Training Complete",
            CommandMarker::UpdateClassifier => "Update Classifier",
        }
    }

    fn from_wire(text: &str) -> Option<Self> {
        match text {
            "Trial Started" => Some(CommandMarker::TrialStarted),
            "Trial Ends" => Some(CommandMarker::TrialEnds),
            "Training Complete" => Some(CommandMarker::TrainingComplete),
            "Update Classifier" => Some(CommandMarker::UpdateClassifier),
            _ => None,
        }
    }
}

/// Which windowed-epoch paradigm an epoch marker belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochKind {
    /// Motor-imagery style windowed signaling, tag `mi`.
    MotorImagery,
    /// Binary switch signaling, tag `switch`.
    Switch,
}

impl EpochKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EpochKind::MotorImagery => "mi",
            EpochKind::Switch => "switch",
        }
    }
}

/// Event markers carrying paradigm state.
#[derive(Debug, Clone, PartialEq)]
pub enum EventMarker {
    /// One windowed-epoch tick (`mi` / `switch`).
    Epoch {
        kind: EpochKind,
        pool_size: usize,
        train_target: Option<usize>,
        window_s: f32,
    },
    /// One frequency-coded epoch tick with the achieved flash frequencies.
    Ssvep {
        pool_size: usize,
        train_target: Option<usize>,
        window_s: f32,
        frequencies: Vec<f32>,
    },
    /// Onset of a single-target flash.
    SingleFlash {
        pool_size: usize,
        train_target: Option<usize>,
        active: usize,
    },
    /// Onset of a simultaneous multi-target flash.
    MultiFlash {
        pool_size: usize,
        train_target: Option<usize>,
        active: Vec<usize>,
    },
}

/// An immutable record for the outgoing marker transport.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMarker {
    Command(CommandMarker),
    Event(EventMarker),
}

impl OutgoingMarker {
    /// Serialize to the wire text form.
    pub fn to_wire(&self) -> String {
        match self {
            OutgoingMarker::Command(cmd) => cmd.as_wire().to_string(),
            OutgoingMarker::Event(ev) => ev.to_wire(),
        }
    }
}

impl From<CommandMarker> for OutgoingMarker {
    fn from(cmd: CommandMarker) -> Self {
        OutgoingMarker::Command(cmd)
    }
}

impl From<EventMarker> for OutgoingMarker {
    fn from(ev: EventMarker) -> Self {
        OutgoingMarker::Event(ev)
    }
}

fn target_field(target: Option<usize>) -> String {
    match target {
        Some(t) => t.to_string(),
        None => "-1".to_string(),
    }
}

impl EventMarker {
    /// Serialize to the wire text form.
    pub fn to_wire(&self) -> String {
        match self {
            EventMarker::Epoch {
                kind,
                pool_size,
                train_target,
                window_s,
            } => format!(
                "{},{},{},{:.2}",
                kind.tag(),
                pool_size,
                target_field(*train_target),
                window_s
            ),
            EventMarker::Ssvep {
                pool_size,
                train_target,
                window_s,
                frequencies,
            } => {
                let mut out = format!(
                    "ssvep,{},{},{:.2}",
                    pool_size,
                    target_field(*train_target),
                    window_s
                );
                for f in frequencies {
                    out.push(',');
                    out.push_str(&format!("{:.2}", f));
                }
                out
            }
            EventMarker::SingleFlash {
                pool_size,
                train_target,
                active,
            } => format!(
                "p300,s,{},{},{}",
                pool_size,
                target_field(*train_target),
                active
            ),
            EventMarker::MultiFlash {
                pool_size,
                train_target,
                active,
            } => {
                let mut out =
                    format!("p300,m,{},{}", pool_size, target_field(*train_target));
                for a in active {
                    out.push(',');
                    out.push_str(&a.to_string());
                }
                out
            }
        }
    }
}

/// A decoded incoming record.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMarker {
    /// A resolved classifier selection, zero-indexed.
    Prediction { selection: usize },
    /// Keepalive from the transport.
    Ping,
    /// An echoed command marker.
    Command(CommandMarker),
    /// An echoed event marker.
    Event(EventMarker),
    /// Anything the variant parsers could not make sense of.
    Unparsed(String),
}

/// Decode one incoming wire record. Never fails; unrecognized input becomes
/// [`IncomingMarker::Unparsed`].
pub fn decode(line: &str) -> IncomingMarker {
    let text = line.trim();
    if text.is_empty() {
        return IncomingMarker::Unparsed(line.to_string());
    }
    if let Some(cmd) = CommandMarker::from_wire(text) {
        return IncomingMarker::Command(cmd);
    }
    if text.eq_ignore_ascii_case("ping") {
        return IncomingMarker::Ping;
    }

    let head = text.split(',').next().unwrap_or("");
    match head {
        "mi" | "switch" | "ssvep" | "p300" => {
            decode_event(text).unwrap_or_else(|| IncomingMarker::Unparsed(line.to_string()))
        }
        _ => decode_prediction(text)
            .unwrap_or_else(|| IncomingMarker::Unparsed(line.to_string())),
    }
}

fn parse_target(field: &str) -> Option<Option<usize>> {
    let v: i64 = field.trim().parse().ok()?;
    if v < 0 {
        Some(None)
    } else {
        Some(Some(v as usize))
    }
}

fn decode_event(text: &str) -> Option<IncomingMarker> {
    let fields: Vec<&str> = text.split(',').collect();
    match fields[0] {
        tag @ ("mi" | "switch") => {
            if fields.len() != 4 {
                return None;
            }
            let kind = if tag == "mi" {
                EpochKind::MotorImagery
            } else {
                EpochKind::Switch
            };
            Some(IncomingMarker::Event(EventMarker::Epoch {
                kind,
                pool_size: fields[1].trim().parse().ok()?,
                train_target: parse_target(fields[2])?,
                window_s: fields[3].trim().parse().ok()?,
            }))
        }
        "ssvep" => {
            if fields.len() < 4 {
                return None;
            }
            let mut frequencies = Vec::with_capacity(fields.len() - 4);
            for f in &fields[4..] {
                frequencies.push(f.trim().parse().ok()?);
            }
            Some(IncomingMarker::Event(EventMarker::Ssvep {
                pool_size: fields[1].trim().parse().ok()?,
                train_target: parse_target(fields[2])?,
                window_s: fields[3].trim().parse().ok()?,
                frequencies,
            }))
        }
        "p300" => {
            if fields.len() < 4 {
                return None;
            }
            let pool_size = fields[2].trim().parse().ok()?;
            let train_target = parse_target(fields[3])?;
            match fields[1].trim() {
                "s" => {
                    if fields.len() != 5 {
                        return None;
                    }
                    Some(IncomingMarker::Event(EventMarker::SingleFlash {
                        pool_size,
                        train_target,
                        active: fields[4].trim().parse().ok()?,
                    }))
                }
                "m" => {
                    let mut active = Vec::with_capacity(fields.len() - 4);
                    for a in &fields[4..] {
                        active.push(a.trim().parse().ok()?);
                    }
                    Some(IncomingMarker::Event(EventMarker::MultiFlash {
                        pool_size,
                        train_target,
                        active,
                    }))
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Parse a prediction echo. The classifier side may bracket the value
/// (`[5]`) or wrap it in a dotted callable (`np.int64(5)`); both are
/// unwrapped before parsing. Wire values are 1-indexed with `0` passed
/// through: `0` stays selection `0`, `N > 0` becomes `N - 1`.
fn decode_prediction(text: &str) -> Option<IncomingMarker> {
    let mut inner = text.trim();
    inner = inner
        .trim_start_matches('[')
        .trim_end_matches(']')
        .trim();
    // Unwrap one `name(...)` callable, e.g. np.int64(5).
    if let (Some(open), Some(close)) = (inner.find('('), inner.rfind(')')) {
        if open < close {
            inner = inner[open + 1..close].trim();
        }
    }
    inner = inner.trim_end_matches('.');
    let value: i64 = inner.parse().ok()?;
    if value < 0 {
        return None;
    }
    let selection = if value == 0 { 0 } else { (value - 1) as usize };
    Some(IncomingMarker::Prediction { selection })
}
