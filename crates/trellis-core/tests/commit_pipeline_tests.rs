// Test suite for the commit pipeline
// Covers phase ordering across priorities, apply_finish coalescing,
// version discipline, and apply-phase error absorption

use std::sync::{Arc, Mutex};

use trellis_core::errors::Result;
use trellis_core::logging_facility::init_test_capture;
use trellis_core::schema::ConfigArgs;
use trellis_core::{
    Capability, ClientKind, CommitEngine, CommitOptions, ConfigStore, DataValue, Event,
    HandlerRegistration, NodeHandler, Path, SchemaDef, SchemaNodeDef, SchemaRegistry,
    TrellisError, TxContext,
};

/// Handler recording "event op path" for every dispatch
struct Recorder {
    calls: Arc<Mutex<Vec<String>>>,
    fail_apply_at: Option<String>,
}

impl Recorder {
    fn log(&self, event: Event, op: &str, path: &Path) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {} {}", event, op, path));
    }
}

impl NodeHandler for Recorder {
    fn capabilities(&self) -> &[Capability] {
        &[
            Capability::Create,
            Capability::Modify,
            Capability::Destroy,
            Capability::ApplyFinish,
        ]
    }

    fn create(&self, args: ConfigArgs<'_>) -> Result<()> {
        self.log(args.event, "create", args.path);
        if args.event == Event::Apply
            && self.fail_apply_at.as_deref() == Some(args.path.to_string().as_str())
        {
            return Err(TrellisError::Internal {
                message: "backend rejected".to_string(),
            });
        }
        if args.event == Event::Prepare {
            *args.resource = Some(Box::new(7u32));
        }
        Ok(())
    }

    fn modify(&self, args: ConfigArgs<'_>) -> Result<()> {
        self.log(args.event, "modify", args.path);
        Ok(())
    }

    fn destroy(&self, args: ConfigArgs<'_>) -> Result<()> {
        self.log(args.event, "destroy", args.path);
        Ok(())
    }

    fn apply_finish(&self, _context: &TxContext, path: &Path) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("apply_finish {}", path));
    }
}

struct Fixture {
    engine: CommitEngine,
    store: ConfigStore,
    calls: Arc<Mutex<Vec<String>>>,
}

fn setup(fail_apply_at: Option<&str>) -> Fixture {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(Recorder {
        calls: calls.clone(),
        fail_apply_at: fail_apply_at.map(str::to_string),
    });
    let registry = SchemaRegistry::build(
        SchemaDef::new(vec![
            SchemaNodeDef::container("/syslog"),
            SchemaNodeDef::leaf("/syslog/level"),
            SchemaNodeDef::container("/acl"),
            SchemaNodeDef::list("/acl/rule", &["name"]),
            SchemaNodeDef::leaf("/acl/rule/value"),
        ]),
        vec![
            HandlerRegistration::new("/syslog", handler.clone()),
            HandlerRegistration::new("/syslog/level", handler.clone()).with_priority(5),
            HandlerRegistration::new("/acl", handler.clone()),
            HandlerRegistration::new("/acl/rule", handler.clone()).with_priority(10),
            HandlerRegistration::new("/acl/rule/value", handler).with_priority(10),
        ],
    )
    .unwrap();
    Fixture {
        engine: CommitEngine::new(Arc::new(registry)),
        store: ConfigStore::new(),
        calls,
    }
}

fn p(text: &str) -> Path {
    Path::parse(text).unwrap()
}

fn seed_syslog(fixture: &mut Fixture) {
    let mut seed = fixture.store.running().dup();
    seed.set_leaf(&p("/syslog/level"), DataValue::from(3i64));
    fixture
        .engine
        .commit(
            &mut fixture.store,
            TxContext::new(ClientKind::Cli),
            seed,
            None,
            CommitOptions::default(),
        )
        .unwrap();
    fixture.calls.lock().unwrap().clear();
}

#[test]
fn test_end_to_end_priority_scenario() {
    // Modify an unrelated leaf at priority 5 and create a list entry with a
    // value leaf at priority 10: the priority-5 modify runs first in every
    // phase, the final tree contains both changes, and the version moves by
    // exactly one.
    let mut fixture = setup(None);
    seed_syslog(&mut fixture);
    let version_before = fixture.store.running().version();

    let mut candidate = fixture.store.running().dup();
    candidate.set_leaf(&p("/syslog/level"), DataValue::from(4i64));
    candidate.set_leaf(&p("/acl/rule[name='foo']/value"), DataValue::from(5i64));

    let version = fixture
        .engine
        .commit(
            &mut fixture.store,
            TxContext::new(ClientKind::Cli),
            candidate,
            Some("add rule foo".to_string()),
            CommitOptions::default(),
        )
        .unwrap();

    assert_eq!(version, version_before + 1);
    assert_eq!(
        fixture.store.running().get_value(&p("/syslog/level")),
        Some(&DataValue::Int64(4))
    );
    assert_eq!(
        fixture
            .store
            .running()
            .get_value(&p("/acl/rule[name='foo']/value")),
        Some(&DataValue::Int64(5))
    );

    // Within each phase the priority-5 modify precedes the priority-10
    // create, and no prepare runs before every validate finished.
    let calls = fixture.calls.lock().unwrap().clone();
    for phase in ["validate", "prepare", "apply"] {
        let in_phase: Vec<&String> = calls
            .iter()
            .filter(|c| c.starts_with(phase) && !c.starts_with("apply_finish"))
            .collect();
        let modify_idx = in_phase
            .iter()
            .position(|c| c.contains("modify /syslog/level"))
            .unwrap_or_else(|| panic!("no {} modify", phase));
        let create_idx = in_phase
            .iter()
            .position(|c| c.contains("create /acl/rule[name='foo']"))
            .unwrap_or_else(|| panic!("no {} create", phase));
        assert!(modify_idx < create_idx, "{} phase out of order", phase);
    }
    let last_validate = calls.iter().rposition(|c| c.starts_with("validate")).unwrap();
    let first_prepare = calls.iter().position(|c| c.starts_with("prepare")).unwrap();
    assert!(last_validate < first_prepare);
}

#[test]
fn test_apply_finish_once_per_touched_subtree() {
    let mut fixture = setup(None);
    seed_syslog(&mut fixture);

    // Two leaves under the same rule entry: one apply_finish for the
    // entry's subtree chain, not one per leaf
    let mut candidate = fixture.store.running().dup();
    candidate.set_leaf(&p("/acl/rule[name='a']/value"), DataValue::from(1i64));
    candidate.set_leaf(&p("/acl/rule[name='b']/value"), DataValue::from(2i64));

    fixture
        .engine
        .commit(
            &mut fixture.store,
            TxContext::default(),
            candidate,
            None,
            CommitOptions::default(),
        )
        .unwrap();

    let calls = fixture.calls.lock().unwrap().clone();
    let acl_finishes = calls
        .iter()
        .filter(|c| c.as_str() == "apply_finish /acl")
        .count();
    assert_eq!(acl_finishes, 1, "coalesced once for /acl: {:?}", calls);
    let rule_a_finishes = calls
        .iter()
        .filter(|c| c.as_str() == "apply_finish /acl/rule[name='a']")
        .count();
    assert_eq!(rule_a_finishes, 1);
}

#[test]
fn test_abort_leaves_version_unchanged() {
    let mut fixture = setup(None);
    seed_syslog(&mut fixture);
    let version_before = fixture.store.running().version();

    let mut candidate = fixture.store.running().dup();
    candidate.set_leaf(&p("/acl/rule[name='tmp']/value"), DataValue::from(9i64));
    let txn = fixture
        .engine
        .prepare(
            &mut fixture.store,
            TxContext::default(),
            candidate,
            None,
            CommitOptions::default(),
        )
        .unwrap();

    fixture.engine.abort(&mut fixture.store, txn);
    assert_eq!(fixture.store.running().version(), version_before);
    assert!(!fixture
        .store
        .running()
        .contains(&p("/acl/rule[name='tmp']")));
}

#[test]
fn test_apply_error_is_logged_not_propagated() {
    // An apply-phase callback failure must not fail the transaction or
    // block the version bump; the error surfaces in the log stream.
    let capture = init_test_capture();
    capture.clear();

    let mut fixture = setup(Some("/acl/rule[name='bad']"));
    seed_syslog(&mut fixture);

    let mut candidate = fixture.store.running().dup();
    candidate.set_leaf(&p("/acl/rule[name='bad']/value"), DataValue::from(1i64));

    let version = fixture
        .engine
        .commit(
            &mut fixture.store,
            TxContext::default(),
            candidate,
            None,
            CommitOptions::default(),
        )
        .unwrap();
    assert_eq!(version, 2);
    assert!(fixture
        .store
        .running()
        .contains(&p("/acl/rule[name='bad']")));

    let logged = capture.count_events(|e| {
        e.op.as_deref() == Some("apply_change")
            && e.fields.get("xpath").map(String::as_str) == Some("/acl/rule[name='bad']")
            && e.fields.get("err.code").map(String::as_str) == Some("ERR_INTERNAL")
    });
    assert_eq!(logged, 1, "apply failure must be logged exactly once");
}

#[test]
fn test_skip_validate_option() {
    let mut fixture = setup(None);

    let mut candidate = fixture.store.running().dup();
    candidate.set_leaf(&p("/syslog/level"), DataValue::from(1i64));

    fixture
        .engine
        .commit(
            &mut fixture.store,
            TxContext::default(),
            candidate,
            None,
            CommitOptions {
                skip_validate: true,
                ..Default::default()
            },
        )
        .unwrap();

    let calls = fixture.calls.lock().unwrap().clone();
    assert!(!calls.iter().any(|c| c.starts_with("validate")));
    assert!(calls.iter().any(|c| c.starts_with("prepare")));
}
