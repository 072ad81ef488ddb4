// Ordering guarantees of the compiled route table.
use switchyard::{
    config::models::{
        DynamicRouteDescriptor, HeaderRule, HeaderValueConfig, I18nConfig, MiddlewareMatcher,
        RedirectRule, RewriteGroups, RewriteRule, RoutingConfig,
    },
    core::{
        RouteTable,
        route_table::{Boundary, Effect, Phase, RouteEntry, TableSettings},
    },
};

fn full_config() -> RoutingConfig {
    let blog = DynamicRouteDescriptor::new("/blog/[slug]", "/blog/:slug");
    RoutingConfig {
        base_path: "/docs".into(),
        build_id: "b1".into(),
        private_outputs: vec!["/server/secret.json".into()],
        headers: vec![HeaderRule {
            source: "/:path*".into(),
            headers: vec![HeaderValueConfig {
                key: "x-frame-options".into(),
                value: "DENY".into(),
            }],
            has: vec![],
            missing: vec![],
            base_path: None,
            locale: None,
        }],
        redirects: vec![RedirectRule::new("/old", "/new").permanent()],
        rewrites: RewriteGroups {
            before_files: vec![RewriteRule::new("/early", "/about")],
            after_files: vec![RewriteRule::new("/late", "/about")],
            fallback: vec![RewriteRule::new("/:path*", "https://legacy.example.com/:path*")],
        },
        dynamic_routes: vec![blog.clone()],
        data_routes: vec![blog],
        middleware: vec![MiddlewareMatcher::new("/account/:path*")],
        i18n: Some(I18nConfig {
            locales: vec!["en".into(), "fr".into()],
            default_locale: "en".into(),
            domains: vec![],
            locale_detection: true,
        }),
        ..RoutingConfig::default()
    }
}

#[test]
fn phases_never_go_backwards() {
    let table = RouteTable::compile(&full_config()).unwrap();
    let phases: Vec<Phase> = table.entries().iter().map(|e| e.phase).collect();
    let mut sorted = phases.clone();
    sorted.sort();
    assert_eq!(phases, sorted);

    for phase in [
        Phase::PrivateOutputs,
        Phase::Locale,
        Phase::Headers,
        Phase::Redirects,
        Phase::Middleware,
        Phase::BeforeFiles,
        Phase::AfterFiles,
        Phase::Fallback,
        Phase::Dynamic,
    ] {
        assert!(
            table.phase_entries(phase).count() > 0,
            "expected entries in {phase}"
        );
    }
}

#[test]
fn boundaries_sit_between_the_rule_groups() {
    let table = RouteTable::compile(&full_config()).unwrap();
    let position = |wanted: Boundary, nth: usize| {
        table
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e.effect, Effect::Boundary(b) if b == wanted))
            .nth(nth)
            .map(|(i, _)| i)
            .unwrap()
    };

    let before_files_end = position(Boundary::BeforeFilesEnd, 0);
    let filesystem = position(Boundary::Filesystem, 0);
    let first_check = position(Boundary::Check, 0);
    let second_check = position(Boundary::Check, 1);
    let hit = position(Boundary::Hit, 0);
    let error = position(Boundary::Error, 0);

    assert!(before_files_end < filesystem);
    assert!(filesystem < first_check);
    assert!(first_check < second_check);
    assert!(second_check < hit);
    assert!(hit < error);
    assert_eq!(table.phase_start(Phase::Filesystem), filesystem);

    // The user's before-files rewrite precedes its end marker; the fallback
    // rewrite sits between the two rechecks.
    let kinds: Vec<(usize, &RouteEntry)> = table.entries().iter().enumerate().collect();
    let rewrite_in = |phase: Phase| {
        kinds
            .iter()
            .find(|(_, e)| e.phase == phase && e.effect.kind() == "rewrite")
            .map(|(i, _)| *i)
            .unwrap()
    };
    assert!(rewrite_in(Phase::BeforeFiles) < before_files_end);
    assert!(rewrite_in(Phase::AfterFiles) < first_check);
    let fallback = rewrite_in(Phase::Fallback);
    assert!(first_check < fallback && fallback < second_check);
}

#[test]
fn user_rules_keep_their_configured_order() {
    let config = RoutingConfig {
        redirects: vec![
            RedirectRule::new("/a", "/first"),
            RedirectRule::new("/:path*", "/second"),
            RedirectRule::new("/b", "/third"),
        ],
        ..RoutingConfig::default()
    };
    let table = RouteTable::compile(&config).unwrap();
    let destinations: Vec<String> = table
        .phase_entries(Phase::Redirects)
        .filter_map(|e| match &e.effect {
            Effect::Redirect { destination, .. } => Some(destination.raw().to_string()),
            _ => None,
        })
        .collect();
    // The built-in trailing slash redirect comes first.
    assert_eq!(destinations.len(), 4);
    assert_eq!(&destinations[1..], ["/first", "/second", "/third"]);
}

#[test]
fn dynamic_routes_are_not_reordered() {
    let config = RoutingConfig {
        dynamic_routes: vec![
            DynamicRouteDescriptor::new("/[...all]", "/:all+"),
            DynamicRouteDescriptor::new("/blog/[slug]", "/blog/:slug"),
        ],
        ..RoutingConfig::default()
    };
    let table = RouteTable::compile(&config).unwrap();
    let names: Vec<&str> = table
        .phase_entries(Phase::Dynamic)
        .filter_map(|e| e.name.as_deref())
        .collect();
    assert_eq!(names, ["/[...all]", "/blog/[slug]"]);
}

#[test]
fn hand_built_tables_are_checked() {
    let backwards = vec![
        RouteEntry::boundary(Phase::Filesystem, Boundary::Filesystem),
        RouteEntry::boundary(Phase::BeforeFiles, Boundary::BeforeFilesEnd),
    ];
    assert!(RouteTable::from_entries(TableSettings::default(), backwards).is_err());

    let misplaced = vec![RouteEntry::boundary(Phase::Headers, Boundary::Hit)];
    assert!(RouteTable::from_entries(TableSettings::default(), misplaced).is_err());

    let duplicated = vec![
        RouteEntry::boundary(Phase::Filesystem, Boundary::Filesystem),
        RouteEntry::boundary(Phase::Filesystem, Boundary::Filesystem),
    ];
    assert!(RouteTable::from_entries(TableSettings::default(), duplicated).is_err());
}

#[test]
fn empty_phases_start_at_the_next_entry() {
    let table = RouteTable::compile(&RoutingConfig::default()).unwrap();
    let filesystem = table.phase_start(Phase::Filesystem);
    // No middleware matchers: re-entering the middleware phase lands on the
    // next populated phase instead of past the end.
    assert!(table.phase_start(Phase::Middleware) <= filesystem);
    assert!(table.phase_start(Phase::Middleware) < table.len());
}
