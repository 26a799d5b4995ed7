//! Chat assistant for the operator.
//!
//! A small rule-based interpreter: free text in, one reply out. Each message
//! is classified into exactly one [`Intent`] by keyword tables (English, with
//! Spanish aliases for the same words), and action intents make a single call
//! into the [`Monitor`]. Nothing here fails; text that matches no table gets
//! a fallback reply.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Local, Timelike};
use tracing::{debug, instrument};

use crate::alarm::ActuatorStatus;
use crate::model::{ReportPeriod, StatusSnapshot};
use crate::monitor::{Monitor, SilenceOutcome};

/// How many detections the history reply lists.
const HISTORY_ITEMS: usize = 5;

/// Days of history the history reply looks at.
const HISTORY_DAYS: u32 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    Silence,
    Test,
    Query,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    FireStatus,
    Alarm(AlarmAction),
    /// `None` asks how to request a report.
    Report(Option<ReportPeriod>),
    SystemStatus,
    History,
    Capabilities,
    Farewell,
    Thanks,
    Fallback,
}

// Keywords are accent-free and lowercase. A trailing `*` matches any word
// starting with the stem; entries with spaces match as a phrase.
const ALARM: &[&str] = &["alarm*", "buzzer", "siren", "sonido"];
// Imperatives only. Words like "off" or "apagada" also show up in questions
// about the alarm, which must never silence it.
const ALARM_SILENCE: &[&str] = &[
    "silence",
    "stop",
    "mute",
    "quiet",
    "turn off",
    "switch off",
    "shut off",
    "silencia",
    "silenciar",
    "silencie",
    "apaga",
    "apagar",
    "apague",
];
// "turn the buzzer off": a verb here plus a bare "off" is also a request.
const ALARM_OFF_VERBS: &[&str] = &["turn", "switch", "shut"];
const ALARM_TEST: &[&str] = &["test*", "prueba*", "probar"];
const REPORT: &[&str] = &["report*", "informe*", "pdf"];
const REPORT_WEEK: &[&str] = &["week*", "semana*"];
const REPORT_MONTH: &[&str] = &["month*", "mensual*", "mes"];
const HISTORY: &[&str] = &[
    "histor*",
    "previous",
    "past",
    "anteriores",
    "detections",
    "detecciones",
];
const STATUS: &[&str] = &[
    "status",
    "state",
    "estado",
    "situacion",
    "how is it going",
    "como va",
];
const FIRE: &[&str] = &["fire*", "flame*", "smoke", "fuego", "incendio", "llama*", "alert*"];
const CAPABILITIES: &[&str] = &[
    "help",
    "ayuda",
    "capabilit*",
    "capacidades",
    "funciones",
    "features",
    "what can you do",
    "puedes hacer",
];
const FAREWELL: &[&str] = &["bye", "goodbye", "adios", "chau", "see you", "nos vemos"];
const THANKS: &[&str] = &["thanks", "thank", "thx", "gracias"];
const GREETING: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "good morning",
    "good afternoon",
    "good evening",
    "hola",
    "buenos",
    "buenas",
];

const FAREWELLS: &[&str] = &[
    "See you! Still watching.",
    "Goodbye! Monitoring continues around the clock.",
    "Take care! I'm here if you need me.",
];
const THANKS_REPLIES: &[&str] = &[
    "You're welcome!",
    "Happy to help!",
    "Always on duty.",
];

const CAPABILITIES_REPLY: &str = "Firewatch can:\n\
    - detect fire in the camera feed in real time\n\
    - sound the alarm automatically once a fire is confirmed\n\
    - silence or test the alarm on request\n\
    - show the latest detections\n\
    - write weekly and monthly reports";

/// Operator text, normalized for keyword matching.
struct Utterance {
    words: Vec<String>,
    /// Words joined by single spaces, padded with a space on each side.
    padded: String,
    /// Ends in `?` or opens with `¿`.
    question: bool,
}

impl Utterance {
    fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        let question = trimmed.ends_with('?') || trimmed.starts_with('¿');
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .map(fold_accent)
            .map(|c| if c.is_alphanumeric() { c } else { ' ' })
            .collect();
        let words: Vec<String> = cleaned.split_whitespace().map(str::to_string).collect();
        let padded = format!(" {} ", words.join(" "));
        Self {
            words,
            padded,
            question,
        }
    }

    fn asks_to_silence(&self) -> bool {
        if self.question {
            return false;
        }
        self.mentions(ALARM_SILENCE) || (self.mentions(ALARM_OFF_VERBS) && self.mentions(&["off"]))
    }

    fn mentions(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|keyword| {
            if keyword.contains(' ') {
                self.padded.contains(&format!(" {keyword} "))
            } else if let Some(stem) = keyword.strip_suffix('*') {
                self.words.iter().any(|w| w.starts_with(stem))
            } else {
                self.words.iter().any(|w| w == keyword)
            }
        })
    }
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

/// Classify one operator message.
///
/// Action requests are checked before questions and small talk, so
/// "hi, silence the fire alarm" silences the alarm. A message phrased as a
/// question never silences; "is the alarm off?" is a query.
pub fn classify(text: &str) -> Intent {
    let u = Utterance::parse(text);

    if u.mentions(ALARM) {
        let action = if u.asks_to_silence() {
            AlarmAction::Silence
        } else if u.mentions(ALARM_TEST) {
            AlarmAction::Test
        } else {
            AlarmAction::Query
        };
        return Intent::Alarm(action);
    }
    if u.mentions(REPORT) {
        let period = if u.mentions(REPORT_WEEK) {
            Some(ReportPeriod::Week)
        } else if u.mentions(REPORT_MONTH) {
            Some(ReportPeriod::Month)
        } else {
            None
        };
        return Intent::Report(period);
    }
    if u.mentions(HISTORY) {
        return Intent::History;
    }
    if u.mentions(STATUS) {
        return Intent::SystemStatus;
    }
    if u.mentions(FIRE) {
        return Intent::FireStatus;
    }
    if u.mentions(CAPABILITIES) {
        return Intent::Capabilities;
    }
    if u.mentions(FAREWELL) {
        return Intent::Farewell;
    }
    if u.mentions(THANKS) {
        return Intent::Thanks;
    }
    if u.mentions(GREETING) {
        return Intent::Greeting;
    }
    Intent::Fallback
}

pub struct Assistant {
    monitor: Arc<Monitor>,
    turn: AtomicUsize,
}

impl Assistant {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self {
            monitor,
            turn: AtomicUsize::new(0),
        }
    }

    /// Reply to one operator message.
    #[instrument(skip(self))]
    pub async fn respond(&self, message: &str) -> String {
        let intent = classify(message);
        debug!(?intent, "Message classified");

        match intent {
            Intent::Greeting => self.greeting(),
            Intent::FireStatus => fire_status(&self.monitor.status()),
            Intent::Alarm(action) => self.alarm(action).await,
            Intent::Report(Some(period)) => self.report(period).await,
            Intent::Report(None) => {
                "To generate a report, say 'weekly report' or 'monthly report'.".to_string()
            }
            Intent::SystemStatus => system_status(&self.monitor.status()),
            Intent::History => self.history(),
            Intent::Capabilities => CAPABILITIES_REPLY.to_string(),
            Intent::Farewell => self.pick(FAREWELLS),
            Intent::Thanks => self.pick(THANKS_REPLIES),
            Intent::Fallback => fallback(message),
        }
    }

    fn greeting(&self) -> String {
        let salutation = match Local::now().hour() {
            0..=11 => "Good morning!",
            12..=18 => "Good afternoon!",
            _ => "Good evening!",
        };
        let alert = if self.monitor.status().fire_detected {
            " FIRE ALERT ACTIVE!"
        } else {
            ""
        };
        format!("{salutation}{alert} Monitoring around the clock.")
    }

    async fn alarm(&self, action: AlarmAction) -> String {
        match action {
            AlarmAction::Silence => match self.monitor.silence_alarm().await {
                SilenceOutcome::AlreadyOff => "The alarm is already off.".to_string(),
                SilenceOutcome::Silenced { fire_present: true } => {
                    "Alarm silenced. Fire is still in view; the silence has been logged."
                        .to_string()
                }
                SilenceOutcome::Silenced {
                    fire_present: false,
                } => "Alarm silenced. Detection continues.".to_string(),
            },
            AlarmAction::Test => match self.monitor.test_alarm() {
                ActuatorStatus::Connected => "Testing the buzzer...".to_string(),
                ActuatorStatus::Disconnected => {
                    "Test sent, but the alarm actuator last reported disconnected. \
                     Check the status again in a moment."
                        .to_string()
                }
            },
            AlarmAction::Query => {
                let status = self.monitor.status();
                match status.alarm_remaining_secs {
                    Some(secs) if status.alarm_active => {
                        format!("Alarm: sounding ({secs:.0}s until auto-off)")
                    }
                    _ => "Alarm: off".to_string(),
                }
            }
        }
    }

    async fn report(&self, period: ReportPeriod) -> String {
        match self.monitor.generate_report(period).await {
            Ok(report) => format!(
                "The {} report has been written to {} ({} detections included).",
                period.label(),
                report.path,
                report.detections
            ),
            Err(e) => format!("Could not generate the report: {e:#}"),
        }
    }

    fn history(&self) -> String {
        let records = self.monitor.log().latest(HISTORY_DAYS, HISTORY_ITEMS);
        if records.is_empty() {
            return "No detections in the past week. All quiet.".to_string();
        }

        let mut reply = format!("Last {} detections:", records.len());
        for record in &records {
            let at = record.timestamp.with_timezone(&Local);
            reply.push_str(&format!(
                "\n- {} - confidence {:.1}%{}",
                at.format("%d/%m %H:%M"),
                record.confidence,
                if record.manual_silence {
                    " (silenced)"
                } else {
                    ""
                }
            ));
        }
        reply
    }

    fn pick(&self, options: &[&str]) -> String {
        let turn = self.turn.fetch_add(1, Ordering::Relaxed);
        options[turn % options.len()].to_string()
    }
}

fn fire_status(status: &StatusSnapshot) -> String {
    if status.fire_detected {
        format!(
            "FIRE DETECTED NOW\nConfidence: {:.1}%\nContinuous time: {:.1}s",
            status.confidence, status.continuous_duration
        )
    } else {
        "No fire detected right now. Everything is under control.".to_string()
    }
}

fn system_status(status: &StatusSnapshot) -> String {
    let fire = if status.fire_detected {
        "ACTIVE"
    } else {
        "none"
    };
    let camera = if status.camera_online {
        "online"
    } else {
        "offline"
    };
    let actuator = if status.actuator_connected {
        "connected"
    } else {
        "disconnected"
    };
    let alarm = if status.alarm_active {
        "sounding"
    } else {
        "silent"
    };
    format!("Fire: {fire}\nCamera: {camera}\nActuator: {actuator}\nAlarm: {alarm}")
}

fn fallback(message: &str) -> String {
    if message.trim().chars().count() < 3 {
        "I didn't catch that. Type 'help' to see what I can do.".to_string()
    } else {
        "Understood. Still monitoring. Type 'help' for assistance.".to_string()
    }
}
