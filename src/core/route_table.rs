//! The compiled route table: an ordered list of entries partitioned into
//! phases that always execute in the same global order.
use std::fmt;

use serde::Serialize;

use super::{
    compiler::CompileError,
    condition::{Condition, ConditionInput, evaluate_conditions},
    destination::{DestinationTemplate, ValueTemplate},
    locale::LocaleSettings,
    pattern::{Params, PathPattern},
};

/// Table phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PrivateOutputs,
    Locale,
    Headers,
    Redirects,
    Middleware,
    BeforeFiles,
    ReservedPages,
    Filesystem,
    AfterFiles,
    Resource,
    Fallback,
    Miss,
    Dynamic,
    Hit,
    Error,
}

impl Phase {
    pub const ALL: [Phase; 15] = [
        Phase::PrivateOutputs,
        Phase::Locale,
        Phase::Headers,
        Phase::Redirects,
        Phase::Middleware,
        Phase::BeforeFiles,
        Phase::ReservedPages,
        Phase::Filesystem,
        Phase::AfterFiles,
        Phase::Resource,
        Phase::Fallback,
        Phase::Miss,
        Phase::Dynamic,
        Phase::Hit,
        Phase::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PrivateOutputs => "private_outputs",
            Phase::Locale => "locale",
            Phase::Headers => "headers",
            Phase::Redirects => "redirects",
            Phase::Middleware => "middleware",
            Phase::BeforeFiles => "before_files",
            Phase::ReservedPages => "reserved_pages",
            Phase::Filesystem => "filesystem",
            Phase::AfterFiles => "after_files",
            Phase::Resource => "resource",
            Phase::Fallback => "fallback",
            Phase::Miss => "miss",
            Phase::Dynamic => "dynamic",
            Phase::Hit => "hit",
            Phase::Error => "error",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checkpoint markers that partition the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    BeforeFilesEnd,
    /// Exact artifact lookup for the current path.
    Filesystem,
    /// Dynamic-route recheck. Appears once after the after-files rewrites
    /// and once after the fallback rewrites.
    Check,
    Resource,
    Miss,
    Hit,
    Error,
}

impl Boundary {
    /// Phases the marker may legally sit in.
    fn allowed_in(self, phase: Phase) -> bool {
        match self {
            Boundary::BeforeFilesEnd => phase == Phase::BeforeFiles,
            Boundary::Filesystem => phase == Phase::Filesystem,
            Boundary::Check => matches!(phase, Phase::AfterFiles | Phase::Fallback),
            Boundary::Resource => phase == Phase::Resource,
            Boundary::Miss => phase == Phase::Miss,
            Boundary::Hit => phase == Phase::Hit,
            Boundary::Error => phase == Phase::Error,
        }
    }
}

/// A header to set; the value may reference captured parameters.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    pub key: String,
    pub value: ValueTemplate,
}

/// The single effect an entry applies when it matches.
#[derive(Debug, Clone)]
pub enum Effect {
    Headers(Vec<HeaderTemplate>),
    Redirect {
        status: u16,
        destination: DestinationTemplate,
    },
    Rewrite {
        destination: DestinationTemplate,
        /// Run the dynamic-route recheck after rewriting.
        check: bool,
    },
    /// Terminate in the error phase with `code`. `page` names the artifact
    /// to render for entries in the error phase.
    Status {
        code: u16,
        page: Option<DestinationTemplate>,
    },
    Middleware,
    Boundary(Boundary),
}

impl Effect {
    pub fn kind(&self) -> &'static str {
        match self {
            Effect::Headers(_) => "headers",
            Effect::Redirect { .. } => "redirect",
            Effect::Rewrite { .. } => "rewrite",
            Effect::Status { .. } => "status",
            Effect::Middleware => "middleware",
            Effect::Boundary(_) => "boundary",
        }
    }
}

/// One compiled rule.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    /// Dynamic routes carry their page name; it keys the visited set.
    pub name: Option<String>,
    pub phase: Phase,
    /// `None` matches every path.
    pub matcher: Option<PathPattern>,
    pub has: Vec<Condition>,
    pub missing: Vec<Condition>,
    /// Match against the path with the default locale removed.
    pub internal: bool,
    pub effect: Effect,
}

impl RouteEntry {
    pub fn new(phase: Phase, matcher: Option<PathPattern>, effect: Effect) -> Self {
        Self {
            name: None,
            phase,
            matcher,
            has: Vec::new(),
            missing: Vec::new(),
            internal: false,
            effect,
        }
    }

    pub fn boundary(phase: Phase, boundary: Boundary) -> Self {
        Self::new(phase, None, Effect::Boundary(boundary))
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_conditions(mut self, has: Vec<Condition>, missing: Vec<Condition>) -> Self {
        self.has = has;
        self.missing = missing;
        self
    }

    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Match the path and conditions, returning captured parameters.
    /// Condition captures override path captures of the same name.
    pub fn evaluate(&self, path: &str, input: &ConditionInput<'_>) -> Option<Params> {
        let mut params = match &self.matcher {
            Some(matcher) => matcher.match_path(path)?,
            None => Params::new(),
        };
        params.extend(evaluate_conditions(&self.has, &self.missing, input)?);
        Some(params)
    }

    /// A one-line description for `inspect` output and debug logs.
    pub fn describe(&self) -> String {
        let source = self
            .matcher
            .as_ref()
            .map(PathPattern::source)
            .unwrap_or("*");
        let detail = match &self.effect {
            Effect::Headers(headers) => headers
                .iter()
                .map(|h| h.key.as_str())
                .collect::<Vec<_>>()
                .join(","),
            Effect::Redirect {
                status,
                destination,
            } => format!("{status} -> {}", destination.raw()),
            Effect::Rewrite { destination, check } => {
                format!("-> {}{}", destination.raw(), if *check { " (check)" } else { "" })
            }
            Effect::Status { code, page } => match page {
                Some(page) => format!("{code} {}", page.raw()),
                None => code.to_string(),
            },
            Effect::Middleware => String::new(),
            Effect::Boundary(b) => format!("{b:?}"),
        };
        format!("[{}] {} {} {}", self.phase, self.effect.kind(), source, detail)
            .trim_end()
            .to_string()
    }
}

/// Table-wide settings the resolver needs at request time.
#[derive(Debug, Clone)]
pub struct TableSettings {
    pub base_path: String,
    pub trailing_slash: bool,
    pub build_id: String,
    pub internal_prefix: String,
    /// Trust the inbound `Host` / `x-forwarded-host` headers.
    pub trust_host_header: bool,
    /// Host used for the initial URL when the host header is not trusted.
    pub hostname: String,
    pub fs_authoritative: bool,
    pub not_found_page: String,
    pub error_page: String,
    pub i18n: Option<LocaleSettings>,
}

impl Default for TableSettings {
    fn default() -> Self {
        Self {
            base_path: String::new(),
            trailing_slash: false,
            build_id: "development".to_string(),
            internal_prefix: "/_sw".to_string(),
            trust_host_header: true,
            hostname: "localhost".to_string(),
            fs_authoritative: true,
            not_found_page: "/404".to_string(),
            error_page: "/500".to_string(),
            i18n: None,
        }
    }
}

/// Immutable, ordered rule table.
#[derive(Debug, Clone)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    settings: TableSettings,
    phase_starts: [usize; Phase::ALL.len()],
}

impl RouteTable {
    /// Build a table from already-ordered entries, validating that phases
    /// never go backwards and boundaries are neither duplicated nor
    /// misplaced.
    pub fn from_entries(settings: TableSettings, entries: Vec<RouteEntry>) -> Result<Self, CompileError> {
        let mut seen: Vec<Boundary> = Vec::new();
        let mut phase_starts = [entries.len(); Phase::ALL.len()];

        for (position, entry) in entries.iter().enumerate() {
            if position > 0 {
                let previous = entries[position - 1].phase;
                if entry.phase < previous {
                    return Err(CompileError::PhaseOrder {
                        position,
                        phase: entry.phase,
                        previous,
                    });
                }
            }

            if let Effect::Boundary(boundary) = entry.effect {
                if !boundary.allowed_in(entry.phase) {
                    return Err(CompileError::MisplacedBoundary {
                        boundary,
                        phase: entry.phase,
                    });
                }
                let limit = if boundary == Boundary::Check { 2 } else { 1 };
                let duplicate_in_phase = boundary == Boundary::Check
                    && entries[..position].iter().any(|e| {
                        e.phase == entry.phase && matches!(e.effect, Effect::Boundary(Boundary::Check))
                    });
                if duplicate_in_phase || seen.iter().filter(|b| **b == boundary).count() >= limit {
                    return Err(CompileError::DuplicateBoundary { boundary });
                }
                seen.push(boundary);
            }
        }

        // Every phase starts at its first entry, or at the next phase's start
        // when empty.
        let mut next = entries.len();
        for phase in Phase::ALL.iter().rev() {
            if let Some(first) = entries.iter().position(|e| e.phase == *phase) {
                next = first;
            }
            phase_starts[phase.index()] = next;
        }

        Ok(Self {
            entries,
            settings,
            phase_starts,
        })
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn settings(&self) -> &TableSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the first entry at or after `phase`.
    pub fn phase_start(&self, phase: Phase) -> usize {
        self.phase_starts[phase.index()]
    }

    pub fn phase_entries(&self, phase: Phase) -> impl Iterator<Item = &RouteEntry> {
        self.entries[self.phase_start(phase)..]
            .iter()
            .take_while(move |e| e.phase == phase)
    }
}
