//! Route table compiler.
//!
//! Turns a [`RoutingConfig`] into one ordered [`RouteTable`]. Configuration
//! only ever contributes entries inside a phase; the phase order itself is
//! fixed here. Every pattern, destination and condition is parsed up front so
//! that malformed input fails the build instead of a request.
use std::collections::BTreeSet;

use thiserror::Error;

use super::{
    condition::{Condition, ConditionError, ConditionKind},
    destination::{DestinationError, DestinationTemplate, ValueTemplate},
    locale::LocaleSettings,
    pattern::{PathPattern, PatternError},
    query::{DATA_KEY, is_reserved_key},
    route_table::{Boundary, Effect, HeaderTemplate, Phase, RouteEntry, RouteTable, TableSettings},
};
use crate::config::models::{
    DynamicRouteDescriptor, HeaderRule, I18nConfig, RedirectRule, RewriteRule, RoutingConfig,
    RuleCondition,
};

/// Cookie holding the visitor's preferred locale.
pub const LOCALE_COOKIE: &str = "SW_LOCALE";

/// Cache policy for fingerprinted static assets.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

const VALID_REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

/// Errors that abort table construction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CompileError {
    #[error("{rule}: invalid pattern: {source}")]
    InvalidPattern { rule: String, source: PatternError },

    #[error("{rule}: invalid destination: {source}")]
    InvalidDestination {
        rule: String,
        source: DestinationError,
    },

    #[error("{rule}: invalid condition: {source}")]
    InvalidCondition {
        rule: String,
        source: ConditionError,
    },

    #[error("{rule}: destination references unknown parameter ':{param}'")]
    UnknownDestinationParam { rule: String, param: String },

    #[error("{rule}: invalid redirect status {status}")]
    InvalidStatus { rule: String, status: u16 },

    #[error("invalid i18n configuration: {message}")]
    InvalidLocale { message: String },

    #[error("invalid setting '{field}': {message}")]
    InvalidSetting { field: &'static str, message: String },

    #[error("boundary {boundary:?} appears more than once")]
    DuplicateBoundary { boundary: Boundary },

    #[error("boundary {boundary:?} cannot appear in phase {phase}")]
    MisplacedBoundary { boundary: Boundary, phase: Phase },

    #[error("entry {position} in phase {phase} follows phase {previous}")]
    PhaseOrder {
        position: usize,
        phase: Phase,
        previous: Phase,
    },
}

impl RouteTable {
    /// Compile routing configuration into a table.
    pub fn compile(config: &RoutingConfig) -> Result<RouteTable, CompileError> {
        Compiler::new(config)?.build()
    }
}

/// Holds the prefixes every rule is wrapped in.
struct Compiler<'a> {
    config: &'a RoutingConfig,
    base_path: &'a str,
    i18n: Option<LocaleSettings>,
    /// `(en|fr|...)`, escaped for use inside a pattern group.
    locale_group: String,
    entries: Vec<RouteEntry>,
}

impl<'a> Compiler<'a> {
    fn new(config: &'a RoutingConfig) -> Result<Self, CompileError> {
        validate_settings(config)?;
        let i18n = config.i18n.as_ref().map(locale_settings).transpose()?;
        let locale_group = i18n
            .as_ref()
            .map(|s| {
                let alternatives: Vec<String> =
                    s.locales.iter().map(|l| regex::escape(l)).collect();
                format!("({})", alternatives.join("|"))
            })
            .unwrap_or_default();

        Ok(Self {
            config,
            base_path: &config.base_path,
            i18n,
            locale_group,
            entries: Vec::new(),
        })
    }

    fn build(mut self) -> Result<RouteTable, CompileError> {
        let config = self.config;

        self.private_outputs()?;
        self.locale_redirects()?;
        for rule in &config.headers {
            self.header_rule(rule)?;
        }
        self.trailing_slash_redirects()?;
        for rule in &config.redirects {
            self.redirect_rule(rule)?;
        }
        self.middleware()?;

        for rule in &config.rewrites.before_files {
            self.rewrite_rule(Phase::BeforeFiles, rule, false)?;
        }
        self.push(RouteEntry::boundary(Phase::BeforeFiles, Boundary::BeforeFilesEnd));

        self.reserved_pages()?;
        self.push(RouteEntry::boundary(Phase::Filesystem, Boundary::Filesystem));

        for rule in &config.rewrites.after_files {
            self.rewrite_rule(Phase::AfterFiles, rule, true)?;
        }
        self.push(RouteEntry::boundary(Phase::AfterFiles, Boundary::Check));
        self.push(RouteEntry::boundary(Phase::Resource, Boundary::Resource));

        for rule in &config.rewrites.fallback {
            self.rewrite_rule(Phase::Fallback, rule, true)?;
        }
        self.push(RouteEntry::boundary(Phase::Fallback, Boundary::Check));
        self.push(RouteEntry::boundary(Phase::Miss, Boundary::Miss));

        for route in &config.data_routes {
            self.data_route(route)?;
        }
        for route in &config.dynamic_routes {
            self.dynamic_route(route)?;
        }

        self.hit()?;
        self.error_pages()?;

        let settings = TableSettings {
            base_path: config.base_path.clone(),
            trailing_slash: config.trailing_slash,
            build_id: config.build_id.clone(),
            internal_prefix: config.internal_prefix.clone(),
            trust_host_header: config.trust_host_header,
            hostname: config.hostname.clone(),
            fs_authoritative: config.fs_routes_authoritative,
            not_found_page: config.not_found_page.clone(),
            error_page: config.error_page.clone(),
            i18n: self.i18n,
        };
        RouteTable::from_entries(settings, self.entries)
    }

    fn push(&mut self, entry: RouteEntry) {
        self.entries.push(entry);
    }

    fn localized(&self) -> bool {
        self.i18n.is_some()
    }

    /// Wrap a user source in the base path and the required locale segment.
    fn source(&self, source: &str, base_path: Option<bool>, locale: Option<bool>) -> String {
        let mut out = String::new();
        if base_path != Some(false) {
            out.push_str(self.base_path);
        }
        if self.localized() && locale != Some(false) {
            out.push_str("/:__sw_locale");
            out.push_str(&self.locale_group);
            if source != "/" {
                out.push_str(source);
            }
        } else if source != "/" || out.is_empty() {
            out.push_str(source);
        }
        out
    }

    /// Internal destinations receive the same prefixes as their source.
    fn destination(&self, destination: &str, base_path: Option<bool>, locale: Option<bool>) -> String {
        if crate::utils::url::is_absolute_url(destination) {
            return destination.to_string();
        }
        let mut out = String::new();
        if base_path != Some(false) {
            out.push_str(self.base_path);
        }
        if self.localized() && locale != Some(false) {
            out.push_str("/:__sw_locale");
            if destination != "/" {
                out.push_str(destination);
            }
        } else if destination != "/" || out.is_empty() {
            out.push_str(destination);
        }
        out
    }

    fn private_outputs(&mut self) -> Result<(), CompileError> {
        let config = self.config;
        for output in &config.private_outputs {
            let rule = format!("private output '{output}'");
            let source = format!("{}{}", self.base_path, escape_pattern(output));
            let matcher = pattern(&rule, &source, false)?;
            self.push(
                RouteEntry::new(
                    Phase::PrivateOutputs,
                    Some(matcher),
                    Effect::Status {
                        code: 404,
                        page: None,
                    },
                )
                .internal(),
            );
        }
        Ok(())
    }

    /// Domain redirects first, then cookie redirects. Both only fire on the
    /// site root.
    fn locale_redirects(&mut self) -> Result<(), CompileError> {
        let Some(i18n) = self.i18n.clone() else {
            return Ok(());
        };
        if !i18n.detection {
            return Ok(());
        }
        let root = if self.base_path.is_empty() {
            "/".to_string()
        } else {
            self.base_path.to_string()
        };

        for domain in &i18n.domains {
            let rule = format!("domain locale '{}'", domain.domain);
            let scheme = if domain.http { "http" } else { "https" };
            let destination = format!("{scheme}://{}{root}", domain.domain);
            let entry = RouteEntry::new(
                Phase::Locale,
                Some(pattern(&rule, &root, false)?),
                Effect::Redirect {
                    status: 307,
                    destination: template(&rule, &destination)?,
                },
            )
            .with_conditions(
                vec![condition(
                    &rule,
                    ConditionKind::Cookie,
                    Some(LOCALE_COOKIE),
                    Some(&regex::escape(&domain.default_locale)),
                )?],
                vec![condition(
                    &rule,
                    ConditionKind::Host,
                    None,
                    Some(&regex::escape(&domain.domain)),
                )?],
            )
            .internal();
            self.push(entry);
        }

        for locale in i18n.locales.iter().filter(|l| **l != i18n.default_locale) {
            let rule = format!("locale cookie '{locale}'");
            let destination = format!("{}/{}", self.base_path, locale);
            // Domains that already serve this locale by default must not
            // bounce back to a prefixed path.
            let missing = i18n
                .domains
                .iter()
                .filter(|d| d.default_locale == *locale)
                .map(|d| {
                    condition(
                        &rule,
                        ConditionKind::Host,
                        None,
                        Some(&regex::escape(&d.domain)),
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            let entry = RouteEntry::new(
                Phase::Locale,
                Some(pattern(&rule, &root, false)?),
                Effect::Redirect {
                    status: 307,
                    destination: template(&rule, &destination)?,
                },
            )
            .with_conditions(
                vec![condition(
                    &rule,
                    ConditionKind::Cookie,
                    Some(LOCALE_COOKIE),
                    Some(&regex::escape(locale)),
                )?],
                missing,
            )
            .internal();
            self.push(entry);
        }
        Ok(())
    }

    fn header_rule(&mut self, rule: &HeaderRule) -> Result<(), CompileError> {
        let name = format!("header rule '{}'", rule.source);
        let source = self.source(&rule.source, rule.base_path, rule.locale);
        let matcher = pattern(&name, &source, false)?;
        let (has, missing) = conditions(&name, &rule.has, &rule.missing)?;
        let available = available_params(&matcher, &has);

        let mut headers = Vec::with_capacity(rule.headers.len());
        for header in &rule.headers {
            let value = ValueTemplate::parse(&header.value);
            check_params(&name, value.param_names(), &available)?;
            headers.push(HeaderTemplate {
                key: header.key.to_ascii_lowercase(),
                value,
            });
        }

        let mut entry = RouteEntry::new(Phase::Headers, Some(matcher), Effect::Headers(headers))
            .with_conditions(has, missing);
        entry.internal = self.localized() && rule.locale == Some(false);
        self.push(entry);
        Ok(())
    }

    fn trailing_slash_redirects(&mut self) -> Result<(), CompileError> {
        let base = self.base_path;
        let (source, destination) = if self.config.trailing_slash {
            (
                format!("{base}/:path((?:[^/]+/)*[^/.]+)"),
                format!("{base}/:path/"),
            )
        } else {
            (format!("{base}/:path+/"), format!("{base}/:path+"))
        };
        let rule = "trailing slash redirect";
        let entry = RouteEntry::new(
            Phase::Redirects,
            Some(pattern(rule, &source, false)?),
            Effect::Redirect {
                status: 308,
                destination: template(rule, &destination)?,
            },
        )
        .internal();
        self.push(entry);
        Ok(())
    }

    fn redirect_rule(&mut self, rule: &RedirectRule) -> Result<(), CompileError> {
        let name = format!("redirect '{}'", rule.source);
        let status = rule.status();
        if !VALID_REDIRECT_STATUSES.contains(&status) {
            return Err(CompileError::InvalidStatus { rule: name, status });
        }
        let source = self.source(&rule.source, rule.base_path, rule.locale);
        let matcher = pattern(&name, &source, false)?;
        let (has, missing) = conditions(&name, &rule.has, &rule.missing)?;
        let destination = template(
            &name,
            &self.destination(&rule.destination, rule.base_path, rule.locale),
        )?;
        check_params(
            &name,
            destination.param_names().into_iter(),
            &available_params(&matcher, &has),
        )?;

        let mut entry = RouteEntry::new(
            Phase::Redirects,
            Some(matcher),
            Effect::Redirect {
                status,
                destination,
            },
        )
        .with_conditions(has, missing);
        entry.internal = self.localized() && rule.locale == Some(false);
        self.push(entry);
        Ok(())
    }

    fn middleware(&mut self) -> Result<(), CompileError> {
        let config = self.config;
        for matcher_config in &config.middleware {
            let name = format!("middleware matcher '{}'", matcher_config.source);
            let mut source = self.base_path.to_string();
            if self.localized() {
                source.push_str("/:__sw_locale");
                source.push_str(&self.locale_group);
                source.push('?');
                if matcher_config.source != "/" {
                    source.push_str(&matcher_config.source);
                }
            } else if matcher_config.source != "/" || source.is_empty() {
                source.push_str(&matcher_config.source);
            }
            let matcher = pattern(&name, &source, false)?;
            let (has, missing) = conditions(&name, &matcher_config.has, &matcher_config.missing)?;
            self.push(
                RouteEntry::new(Phase::Middleware, Some(matcher), Effect::Middleware)
                    .with_conditions(has, missing),
            );
        }
        Ok(())
    }

    fn rewrite_rule(&mut self, phase: Phase, rule: &RewriteRule, check: bool) -> Result<(), CompileError> {
        let name = format!("{phase} rewrite '{}'", rule.source);
        let source = self.source(&rule.source, rule.base_path, rule.locale);
        let matcher = pattern(&name, &source, false)?;
        let (has, missing) = conditions(&name, &rule.has, &rule.missing)?;
        let destination = template(
            &name,
            &self.destination(&rule.destination, rule.base_path, rule.locale),
        )?;
        check_params(
            &name,
            destination.param_names().into_iter(),
            &available_params(&matcher, &has),
        )?;

        let mut entry = RouteEntry::new(
            phase,
            Some(matcher),
            Effect::Rewrite { destination, check },
        )
        .with_conditions(has, missing);
        entry.internal = self.localized() && rule.locale == Some(false);
        self.push(entry);
        Ok(())
    }

    /// Direct requests for the error pages are answered as not found.
    fn reserved_pages(&mut self) -> Result<(), CompileError> {
        let config = self.config;
        let pages = [&config.not_found_page, &config.error_page];
        for page in pages {
            let rule = format!("reserved page '{page}'");
            let mut source = self.base_path.to_string();
            if self.localized() {
                source.push_str("/:__sw_locale");
                source.push_str(&self.locale_group);
                source.push('?');
            }
            source.push_str(&escape_pattern(page));
            let entry = RouteEntry::new(
                Phase::ReservedPages,
                Some(pattern(&rule, &source, false)?),
                Effect::Status {
                    code: 404,
                    page: None,
                },
            );
            self.push(entry);
        }
        Ok(())
    }

    /// `/page/[slug]?slug=:slug`: the page artifact plus its parameters
    /// under their route keys.
    fn page_destination(
        &self,
        name: &str,
        route: &DynamicRouteDescriptor,
        extra_query: Option<&str>,
    ) -> Result<DestinationTemplate, CompileError> {
        let route_pattern = pattern(name, &route.pattern, true)?;
        let params: BTreeSet<&str> = route_pattern.param_names().collect();
        if let Some(key) = route.route_keys.keys().find(|k| !params.contains(k.as_str())) {
            return Err(CompileError::UnknownDestinationParam {
                rule: name.to_string(),
                param: key.clone(),
            });
        }

        let mut query: Vec<String> = route_pattern
            .param_names()
            .map(|param| {
                let key = route.route_keys.get(param).map(String::as_str).unwrap_or(param);
                format!("{key}=:{param}")
            })
            .collect();
        query.extend(extra_query.map(str::to_string));

        let mut destination = self.destination(&escape_destination(&route.page), None, None);
        if !query.is_empty() {
            destination.push('?');
            destination.push_str(&query.join("&"));
        }
        template(name, &destination)
    }

    fn data_route(&mut self, route: &DynamicRouteDescriptor) -> Result<(), CompileError> {
        let config = self.config;
        let name = format!("data route '{}'", route.page);
        let mut source = format!(
            "{}{}/data/{}",
            self.base_path,
            config.internal_prefix,
            escape_pattern(&config.build_id)
        );
        if self.localized() {
            source.push_str("/:__sw_locale");
            source.push_str(&self.locale_group);
        }
        source.push_str(if route.pattern == "/" {
            "/index"
        } else {
            &route.pattern
        });
        source.push_str(".json");

        let matcher = pattern(&name, &source, true)?;
        let destination = self.page_destination(&name, route, Some(&format!("{DATA_KEY}=1")))?;

        self.push(
            RouteEntry::new(
                Phase::Dynamic,
                Some(matcher),
                Effect::Rewrite {
                    destination,
                    check: true,
                },
            )
            .with_name(format!("data:{}", route.page)),
        );
        Ok(())
    }

    fn dynamic_route(&mut self, route: &DynamicRouteDescriptor) -> Result<(), CompileError> {
        let name = format!("dynamic route '{}'", route.page);
        let matcher = pattern(&name, &self.source(&route.pattern, None, None), true)?;
        let destination = self.page_destination(&name, route, None)?;

        self.push(
            RouteEntry::new(
                Phase::Dynamic,
                Some(matcher),
                Effect::Rewrite {
                    destination,
                    check: true,
                },
            )
            .with_name(route.page.clone()),
        );
        Ok(())
    }

    fn hit(&mut self) -> Result<(), CompileError> {
        self.push(RouteEntry::boundary(Phase::Hit, Boundary::Hit));
        let rule = "static asset cache headers";
        let source = format!("{}{}/static/:path*", self.base_path, self.config.internal_prefix);
        self.push(RouteEntry::new(
            Phase::Hit,
            Some(pattern(rule, &source, false)?),
            Effect::Headers(vec![HeaderTemplate {
                key: "cache-control".to_string(),
                value: ValueTemplate::parse(IMMUTABLE_CACHE_CONTROL),
            }]),
        ));
        Ok(())
    }

    /// Error pages are chosen by code, qualified with the path's locale, or
    /// the domain's default locale when the path carries none.
    fn error_pages(&mut self) -> Result<(), CompileError> {
        self.push(RouteEntry::boundary(Phase::Error, Boundary::Error));
        let pages = [
            (404, self.config.not_found_page.clone()),
            (500, self.config.error_page.clone()),
        ];
        for (code, page) in pages {
            let rule = format!("error page {code}");
            let page = escape_destination(&page);
            if self.localized() {
                let source = format!("{}/:__sw_locale{}/:__sw_rest*", self.base_path, self.locale_group);
                let destination = format!("{}/:__sw_locale{page}", self.base_path);
                self.push(RouteEntry::new(
                    Phase::Error,
                    Some(pattern(&rule, &source, false)?),
                    Effect::Status {
                        code,
                        page: Some(template(&rule, &destination)?),
                    },
                ));
                let fallback = format!("{}/:__sw_default_locale{page}", self.base_path);
                self.push(RouteEntry::new(
                    Phase::Error,
                    Some(pattern(&rule, "/:__sw_rest*", false)?),
                    Effect::Status {
                        code,
                        page: Some(template(&rule, &fallback)?),
                    },
                ));
            } else {
                self.push(RouteEntry::new(
                    Phase::Error,
                    Some(pattern(&rule, "/:__sw_rest*", false)?),
                    Effect::Status {
                        code,
                        page: Some(template(&rule, &format!("{}{page}", self.base_path))?),
                    },
                ));
            }
        }
        Ok(())
    }
}

fn validate_settings(config: &RoutingConfig) -> Result<(), CompileError> {
    let base = &config.base_path;
    if !base.is_empty() && (!base.starts_with('/') || base.ends_with('/')) {
        return Err(CompileError::InvalidSetting {
            field: "base_path",
            message: format!("'{base}' must start with '/' and not end with '/'"),
        });
    }
    let prefix = &config.internal_prefix;
    if !prefix.starts_with('/') || prefix.ends_with('/') || prefix.len() < 2 {
        return Err(CompileError::InvalidSetting {
            field: "internal_prefix",
            message: format!("'{prefix}' must start with '/' and not end with '/'"),
        });
    }
    if config.build_id.is_empty() || config.build_id.contains('/') {
        return Err(CompileError::InvalidSetting {
            field: "build_id",
            message: "must be non-empty and contain no '/'".to_string(),
        });
    }
    for (field, page) in [
        ("not_found_page", &config.not_found_page),
        ("error_page", &config.error_page),
    ] {
        if !page.starts_with('/') || page.len() < 2 {
            return Err(CompileError::InvalidSetting {
                field,
                message: format!("'{page}' must be a page path"),
            });
        }
    }
    Ok(())
}

fn locale_settings(i18n: &I18nConfig) -> Result<LocaleSettings, CompileError> {
    let invalid = |message: String| CompileError::InvalidLocale { message };
    if i18n.locales.is_empty() {
        return Err(invalid("at least one locale is required".to_string()));
    }
    let mut seen = BTreeSet::new();
    for locale in &i18n.locales {
        if locale.is_empty() || locale.contains('/') {
            return Err(invalid(format!("'{locale}' is not a valid locale")));
        }
        if !seen.insert(locale.to_ascii_lowercase()) {
            return Err(invalid(format!("locale '{locale}' is listed twice")));
        }
    }
    if !i18n.locales.contains(&i18n.default_locale) {
        return Err(invalid(format!(
            "default locale '{}' is not one of the configured locales",
            i18n.default_locale
        )));
    }
    for domain in &i18n.domains {
        if !i18n.locales.contains(&domain.default_locale) {
            return Err(invalid(format!(
                "domain '{}' uses unknown default locale '{}'",
                domain.domain, domain.default_locale
            )));
        }
    }
    Ok(LocaleSettings {
        locales: i18n.locales.clone(),
        default_locale: i18n.default_locale.clone(),
        domains: i18n.domains.clone(),
        detection: i18n.locale_detection,
    })
}

fn pattern(rule: &str, source: &str, case_sensitive: bool) -> Result<PathPattern, CompileError> {
    let parsed = if case_sensitive {
        PathPattern::parse_case_sensitive(source)
    } else {
        PathPattern::parse(source)
    };
    parsed.map_err(|source| CompileError::InvalidPattern {
        rule: rule.to_string(),
        source,
    })
}

fn template(rule: &str, destination: &str) -> Result<DestinationTemplate, CompileError> {
    DestinationTemplate::parse(destination).map_err(|source| CompileError::InvalidDestination {
        rule: rule.to_string(),
        source,
    })
}

fn condition(
    rule: &str,
    kind: ConditionKind,
    key: Option<&str>,
    value: Option<&str>,
) -> Result<Condition, CompileError> {
    Condition::new(kind, key, value).map_err(|source| CompileError::InvalidCondition {
        rule: rule.to_string(),
        source,
    })
}

fn conditions(
    rule: &str,
    has: &[RuleCondition],
    missing: &[RuleCondition],
) -> Result<(Vec<Condition>, Vec<Condition>), CompileError> {
    let compile = |list: &[RuleCondition]| {
        list.iter()
            .map(|c| condition(rule, c.kind, c.key.as_deref(), c.value.as_deref()))
            .collect::<Result<Vec<_>, _>>()
    };
    Ok((compile(has)?, compile(missing)?))
}

fn available_params(matcher: &PathPattern, has: &[Condition]) -> BTreeSet<String> {
    matcher
        .param_names()
        .map(str::to_string)
        .chain(has.iter().flat_map(Condition::capture_names))
        .collect()
}

fn check_params<'p>(
    rule: &str,
    used: impl Iterator<Item = &'p str>,
    available: &BTreeSet<String>,
) -> Result<(), CompileError> {
    for param in used {
        if !available.contains(param) && !is_reserved_key(param) {
            return Err(CompileError::UnknownDestinationParam {
                rule: rule.to_string(),
                param: param.to_string(),
            });
        }
    }
    Ok(())
}

/// Escape a literal path so the pattern parser treats it verbatim.
fn escape_pattern(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, ':' | '(' | ')' | '?' | '*' | '+' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Page names may contain `:` only by accident; keep them literal in a
/// destination by percent-encoding it.
fn escape_destination(page: &str) -> String {
    page.replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{HeaderValueConfig, RewriteGroups};

    fn kinds(table: &RouteTable) -> Vec<(Phase, &'static str)> {
        table
            .entries()
            .iter()
            .map(|e| (e.phase, e.effect.kind()))
            .collect()
    }

    #[test]
    fn empty_config_produces_the_fixed_skeleton() {
        let table = RouteTable::compile(&RoutingConfig::default()).unwrap();
        let boundaries: Vec<Boundary> = table
            .entries()
            .iter()
            .filter_map(|e| match e.effect {
                Effect::Boundary(b) => Some(b),
                _ => None,
            })
            .collect();
        assert_eq!(
            boundaries,
            vec![
                Boundary::BeforeFilesEnd,
                Boundary::Filesystem,
                Boundary::Check,
                Boundary::Resource,
                Boundary::Check,
                Boundary::Miss,
                Boundary::Hit,
                Boundary::Error,
            ]
        );
    }

    #[test]
    fn user_rules_land_in_their_phases() {
        let config = RoutingConfig {
            headers: vec![HeaderRule {
                source: "/:path*".into(),
                headers: vec![HeaderValueConfig {
                    key: "X-Frame-Options".into(),
                    value: "DENY".into(),
                }],
                has: vec![],
                missing: vec![],
                base_path: None,
                locale: None,
            }],
            rewrites: RewriteGroups {
                fallback: vec![RewriteRule {
                    source: "/:path*".into(),
                    destination: "/legacy/:path*".into(),
                    has: vec![],
                    missing: vec![],
                    base_path: None,
                    locale: None,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let table = RouteTable::compile(&config).unwrap();
        let kinds = kinds(&table);
        assert_eq!(kinds[0], (Phase::Headers, "headers"));
        assert!(kinds.contains(&(Phase::Fallback, "rewrite")));
        let fallback = table.phase_entries(Phase::Fallback).next().unwrap();
        assert!(matches!(fallback.effect, Effect::Rewrite { check: true, .. }));
    }

    #[test]
    fn unknown_destination_parameter_fails() {
        let config = RoutingConfig {
            redirects: vec![RedirectRule {
                source: "/old/:slug".into(),
                destination: "/new/:id".into(),
                status_code: 307,
                permanent: None,
                has: vec![],
                missing: vec![],
                base_path: None,
                locale: None,
            }],
            ..Default::default()
        };
        let err = RouteTable::compile(&config).unwrap_err();
        assert!(matches!(err, CompileError::UnknownDestinationParam { ref param, .. } if param == "id"));
    }

    #[test]
    fn condition_captures_are_available_to_destinations() {
        let config = RoutingConfig {
            redirects: vec![RedirectRule {
                source: "/account".into(),
                destination: "/u/:user".into(),
                status_code: 302,
                permanent: None,
                has: vec![RuleCondition {
                    kind: ConditionKind::Cookie,
                    key: Some("session".into()),
                    value: Some("(?P<user>[a-z]+)".into()),
                }],
                missing: vec![],
                base_path: None,
                locale: None,
            }],
            ..Default::default()
        };
        assert!(RouteTable::compile(&config).is_ok());
    }

    #[test]
    fn invalid_redirect_status_fails() {
        let config = RoutingConfig {
            redirects: vec![RedirectRule {
                source: "/a".into(),
                destination: "/b".into(),
                status_code: 200,
                permanent: None,
                has: vec![],
                missing: vec![],
                base_path: None,
                locale: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            RouteTable::compile(&config),
            Err(CompileError::InvalidStatus { status: 200, .. })
        ));
    }

    #[test]
    fn invalid_pattern_fails_fast() {
        let config = RoutingConfig {
            rewrites: RewriteGroups {
                before_files: vec![RewriteRule {
                    source: "/a/(unclosed".into(),
                    destination: "/b".into(),
                    has: vec![],
                    missing: vec![],
                    base_path: None,
                    locale: None,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            RouteTable::compile(&config),
            Err(CompileError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn i18n_requires_default_locale_in_list() {
        let config = RoutingConfig {
            i18n: Some(I18nConfig {
                locales: vec!["en".into()],
                default_locale: "fr".into(),
                domains: vec![],
                locale_detection: true,
            }),
            ..Default::default()
        };
        assert!(matches!(
            RouteTable::compile(&config),
            Err(CompileError::InvalidLocale { .. })
        ));
    }

    #[test]
    fn localized_sources_require_a_locale_segment() {
        let config = RoutingConfig {
            base_path: "/docs".into(),
            i18n: Some(I18nConfig {
                locales: vec!["en".into(), "fr".into()],
                default_locale: "en".into(),
                domains: vec![],
                locale_detection: false,
            }),
            rewrites: RewriteGroups {
                before_files: vec![RewriteRule {
                    source: "/blog/:slug".into(),
                    destination: "/posts/:slug".into(),
                    has: vec![],
                    missing: vec![],
                    base_path: None,
                    locale: None,
                }],
                ..Default::default()
            },
            ..Default::default()
        };
        let table = RouteTable::compile(&config).unwrap();
        let rewrite = table.phase_entries(Phase::BeforeFiles).next().unwrap();
        let matcher = rewrite.matcher.as_ref().unwrap();
        assert_eq!(matcher.source(), "/docs/:__sw_locale(en|fr)/blog/:slug");
        assert!(matcher.is_match("/docs/fr/blog/x"));
        assert!(!matcher.is_match("/docs/blog/x"));
        // detection disabled: no locale redirects
        assert_eq!(table.phase_entries(Phase::Locale).count(), 0);
    }

    #[test]
    fn data_routes_precede_dynamic_routes() {
        let route = DynamicRouteDescriptor {
            page: "/blog/[slug]".into(),
            pattern: "/blog/:slug".into(),
            route_keys: Default::default(),
        };
        let config = RoutingConfig {
            build_id: "b1".into(),
            dynamic_routes: vec![route.clone()],
            data_routes: vec![route],
            ..Default::default()
        };
        let table = RouteTable::compile(&config).unwrap();
        let dynamic: Vec<&RouteEntry> = table.phase_entries(Phase::Dynamic).collect();
        assert_eq!(dynamic.len(), 2);
        assert_eq!(dynamic[0].name.as_deref(), Some("data:/blog/[slug]"));
        assert!(dynamic[0].matcher.as_ref().unwrap().is_match("/_sw/data/b1/blog/post.json"));
        assert_eq!(dynamic[1].name.as_deref(), Some("/blog/[slug]"));
    }
}
