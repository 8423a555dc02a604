//! End-to-end engine scenarios over an in-process connector.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use idflow_connector::{
    AttributeSet, BoxedConnector, Connector, ConnectorConfig, ConnectorFactory, ConnectorGateway,
    ConnectorRegistry, ConnectorResult, CreateOp, DeleteOp, Filter, PageRequest, RemoteObject,
    ResourceProfile, SearchOp, SearchPage, SyncBatch, SyncOp, Uid, UpdateOp,
};
use idflow_core::{AttrValue, Entity, EntityKey, EntityKind, GroupDef, SchemaDef};
use idflow_provisioning::correlation::DefaultCorrelationRule;
use idflow_provisioning::membership::EqualsPredicateEvaluator;
use idflow_provisioning::propagation::ExecutionMode;
use idflow_provisioning::store::{
    EntityStore, InMemoryEntityStore, InMemoryRemediationStore, InMemorySyncTokenStore,
    InMemoryTaskStore, RemediationStore, SyncTokenStore, TaskStore,
};
use idflow_provisioning::{
    ActionRegistry, CorrelationRegistry, DynMembershipEvaluator, ExecStatus, Mapping, MappingItem,
    MappingResolver, Operation, PropagationOrchestrator, Provision, PullEngine, PullMode,
    PullTask, Resource, ResourceDirectory, Template, TransformerRegistry, VirtualAttrCache,
    VirtualAttrResolver,
};

#[derive(Default)]
struct MockState {
    objects: Vec<RemoteObject>,
    batch: Option<SyncBatch>,
    calls: Vec<String>,
}

struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connector for MockConnector {
    fn bundle(&self) -> &str {
        "mock"
    }
    async fn test_connection(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

#[async_trait]
impl CreateOp for MockConnector {
    async fn create(&self, _: &str, attrs: AttributeSet) -> ConnectorResult<Uid> {
        let mut state = self.state.lock().unwrap();
        let uid = attrs
            .get_first("uid")
            .unwrap_or_else(|| "generated".to_string());
        state.calls.push(format!("create:{uid}"));
        Ok(Uid::from_value(uid))
    }
}

#[async_trait]
impl UpdateOp for MockConnector {
    async fn update(&self, _: &str, uid: &Uid, _: AttributeSet) -> ConnectorResult<Uid> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("update:{}", uid.value()));
        Ok(uid.clone())
    }
}

#[async_trait]
impl DeleteOp for MockConnector {
    async fn delete(&self, _: &str, uid: &Uid) -> ConnectorResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete:{}", uid.value()));
        Ok(())
    }
}

#[async_trait]
impl SearchOp for MockConnector {
    async fn search(
        &self,
        object_class: &str,
        filter: Option<&Filter>,
        _: &PageRequest,
    ) -> ConnectorResult<SearchPage> {
        let state = self.state.lock().unwrap();
        let objects = state
            .objects
            .iter()
            .filter(|o| o.object_class == object_class)
            .filter(|o| filter.map_or(true, |f| f.matches(&o.attributes)))
            .cloned()
            .collect();
        Ok(SearchPage::last(objects))
    }
}

#[async_trait]
impl SyncOp for MockConnector {
    async fn sync(&self, _: &str, _: Option<&str>) -> ConnectorResult<SyncBatch> {
        let state = self.state.lock().unwrap();
        Ok(state.batch.clone().unwrap_or_else(SyncBatch::empty))
    }
}

struct MockFactory {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl ConnectorFactory for MockFactory {
    async fn create(&self, _: &BTreeMap<String, Value>) -> ConnectorResult<BoxedConnector> {
        Ok(Arc::new(MockConnector {
            state: self.state.clone(),
        }))
    }
}

struct Env {
    engine: PullEngine,
    orchestrator: Arc<PropagationOrchestrator>,
    gateway: Arc<ConnectorGateway>,
    directory: Arc<ResourceDirectory>,
    store: Arc<InMemoryEntityStore>,
    tasks: Arc<InMemoryTaskStore>,
    remediations: Arc<InMemoryRemediationStore>,
    tokens: Arc<InMemorySyncTokenStore>,
    cache: Arc<VirtualAttrCache>,
    correlations: Arc<CorrelationRegistry>,
    state: Arc<Mutex<MockState>>,
}

async fn env() -> Env {
    let state = Arc::new(Mutex::new(MockState::default()));
    let registry = Arc::new(ConnectorRegistry::new());
    registry
        .register_factory("mock", Arc::new(MockFactory { state: state.clone() }))
        .await;
    let gateway = Arc::new(ConnectorGateway::new(registry));

    let directory = Arc::new(ResourceDirectory::new());
    let store = InMemoryEntityStore::shared();
    let tasks = InMemoryTaskStore::shared();
    let remediations = InMemoryRemediationStore::shared();
    let tokens = InMemorySyncTokenStore::shared();
    let cache = Arc::new(VirtualAttrCache::new(Duration::from_secs(300)));
    let correlations = Arc::new(CorrelationRegistry::new());
    let actions = Arc::new(ActionRegistry::new());
    let resolver = Arc::new(MappingResolver::new(
        store.clone(),
        Arc::new(TransformerRegistry::with_builtins()),
        cache.clone(),
    ));
    let memberships = Arc::new(DynMembershipEvaluator::new(
        store.clone(),
        Arc::new(EqualsPredicateEvaluator),
    ));
    let orchestrator = Arc::new(PropagationOrchestrator::new(
        gateway.clone(),
        directory.clone(),
        resolver.clone(),
        store.clone(),
        tasks.clone(),
        cache.clone(),
        actions.clone(),
        memberships.clone(),
    ));
    let engine = PullEngine::new(
        gateway.clone(),
        directory.clone(),
        resolver,
        correlations.clone(),
        store.clone(),
        tasks.clone(),
        remediations.clone(),
        tokens.clone(),
        cache.clone(),
        actions,
        memberships,
        orchestrator.clone(),
    );

    Env {
        engine,
        orchestrator,
        gateway,
        directory,
        store,
        tasks,
        remediations,
        tokens,
        cache,
        correlations,
        state,
    }
}

fn account_mapping() -> Mapping {
    Mapping::new(vec![
        MappingItem::new("name", "uid").as_conn_object_key(),
        MappingItem::new("email", "mail"),
        MappingItem::new("employeeId", "employeeNumber"),
    ])
}

async fn register_resource(env: &Env, name: &str) {
    let resource = Resource::new(ResourceProfile::new(
        name,
        ConnectorConfig::new("mock", "1.0"),
    ))
    .with_provision(Provision::new(EntityKind::User, "account", account_mapping()));
    env.directory.register(resource).await.unwrap();
}

fn remote_account(uid: &str, email: &str, employee_id: &str) -> RemoteObject {
    RemoteObject::new(
        Uid::from_value(uid),
        "account",
        AttributeSet::new()
            .with("uid", uid)
            .with("mail", email)
            .with("employeeNumber", employee_id),
    )
}

#[tokio::test]
async fn full_pull_creates_and_routes_failures_to_remediation() {
    let env = env().await;
    register_resource(&env, "hr").await;

    // Two pre-existing entities share the employee id the third remote
    // object correlates on.
    env.store
        .save(&Entity::new(EntityKind::User, "dup-a").with_attr("employeeId", "E-2"))
        .await
        .unwrap();
    env.store
        .save(&Entity::new(EntityKind::User, "dup-b").with_attr("employeeId", "E-2"))
        .await
        .unwrap();
    env.correlations
        .register(
            "by-employee-id",
            Arc::new(DefaultCorrelationRule::new(vec!["employeeId".to_string()])),
        )
        .await;

    env.state.lock().unwrap().objects = vec![
        remote_account("alice", "alice@example.com", "E-100"),
        remote_account("bob", "bob@example.com", "E-101"),
        remote_account("troubled", "troubled@example.com", "E-2"),
    ];

    let mut task = PullTask::full("hr");
    task.correlation_rule = Some("by-employee-id".to_string());
    let summary = env.engine.execute(&task).await.unwrap();

    assert_eq!(summary.created, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.remediations, 1);
    assert_eq!(summary.to_string(), "[updated/failures]: 2/1");

    let alice = env
        .store
        .search(EntityKind::User, &[("name".to_string(), "alice".to_string())])
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);
    assert_eq!(
        alice[0].attr("email"),
        Some(&AttrValue::from("alice@example.com"))
    );
    assert!(alice[0].resources.contains("hr"));

    let pending = env.remediations.list().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].error.contains("ambiguous"));
    assert_eq!(pending[0].resource, "hr");
}

#[tokio::test]
async fn remedy_replays_once_the_conflict_is_resolved() {
    let env = env().await;
    register_resource(&env, "hr").await;

    let dup_a = Entity::new(EntityKind::User, "dup-a").with_attr("employeeId", "E-2");
    let dup_b = Entity::new(EntityKind::User, "dup-b").with_attr("employeeId", "E-2");
    env.store.save(&dup_a).await.unwrap();
    env.store.save(&dup_b).await.unwrap();
    env.correlations
        .register(
            "by-employee-id",
            Arc::new(DefaultCorrelationRule::new(vec!["employeeId".to_string()])),
        )
        .await;

    env.state.lock().unwrap().objects =
        vec![remote_account("troubled", "troubled@example.com", "E-2")];

    let mut task = PullTask::full("hr");
    task.correlation_rule = Some("by-employee-id".to_string());
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.remediations, 1);

    // Operator removes one duplicate, then replays. The default (by-name)
    // rule finds no match and the entity is created.
    env.store.delete(&dup_b.key).await.unwrap();
    let record = env.remediations.list().await.unwrap().remove(0);
    env.engine.remedy(&record.id).await.unwrap();

    assert!(env.remediations.list().await.unwrap().is_empty());
    let created = env
        .store
        .search(
            EntityKind::User,
            &[("name".to_string(), "troubled".to_string())],
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 1);
}

#[tokio::test]
async fn incremental_pull_advances_token_only_when_changes_arrive() {
    let env = env().await;
    register_resource(&env, "hr").await;

    // No changes: token stays unset.
    env.state.lock().unwrap().batch = Some(SyncBatch::empty());
    let task = PullTask::full("hr").with_mode(PullMode::Incremental);
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.succeeded(), 0);
    assert_eq!(summary.failed, 0);
    assert!(env
        .tokens
        .get("hr", EntityKind::User)
        .await
        .unwrap()
        .is_none());

    // One upsert arrives with a new token.
    let object = remote_account("carol", "carol@example.com", "E-7");
    env.state.lock().unwrap().batch = Some(SyncBatch {
        events: vec![idflow_connector::SyncEvent::upsert(
            object.uid.clone(),
            "account",
            object.attributes.clone(),
        )],
        new_token: Some("t-1".to_string()),
    });

    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(
        env.tokens.get("hr", EntityKind::User).await.unwrap().as_deref(),
        Some("t-1")
    );
}

#[tokio::test]
async fn delete_event_unlinks_when_configured() {
    let env = env().await;
    register_resource(&env, "hr").await;

    let joe = Entity::new(EntityKind::User, "joe").with_resource("hr");
    env.store.save(&joe).await.unwrap();

    env.state.lock().unwrap().batch = Some(SyncBatch {
        events: vec![idflow_connector::SyncEvent::deleted(
            Uid::from_value("joe"),
            "account",
        )],
        new_token: None,
    });

    let mut task = PullTask::full("hr").with_mode(PullMode::Incremental);
    task.unlink_only = true;
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.unlinked, 1);

    let survivor = env.store.get(&joe.key).await.unwrap().unwrap();
    assert!(!survivor.resources.contains("hr"));
}

#[tokio::test]
async fn delete_event_removes_entity_from_other_resources() {
    let env = env().await;
    register_resource(&env, "hr").await;
    register_resource(&env, "ldap").await;

    let kim = Entity::new(EntityKind::User, "kim")
        .with_resource("hr")
        .with_resource("ldap");
    env.store.save(&kim).await.unwrap();

    env.state.lock().unwrap().batch = Some(SyncBatch {
        events: vec![idflow_connector::SyncEvent::deleted(
            Uid::from_value("kim"),
            "account",
        )],
        new_token: None,
    });

    let task = PullTask::full("hr").with_mode(PullMode::Incremental);
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.deleted, 1);

    assert!(env.store.get(&kim.key).await.unwrap().is_none());
    let calls = env.state.lock().unwrap().calls.clone();
    assert!(
        calls.contains(&"delete:kim".to_string()),
        "no onward delete: {calls:?}"
    );
}

#[tokio::test]
async fn template_defaults_and_dynamic_membership_on_create() {
    let env = env().await;
    register_resource(&env, "hr").await;

    let engineers = GroupDef::new(EntityKey::new(), "engineers")
        .with_resource("ldap")
        .with_condition("dept==eng");
    env.store.save_group(&engineers).await.unwrap();

    env.state.lock().unwrap().objects =
        vec![remote_account("dora", "dora@example.com", "E-55")];

    let template = Template {
        plain_attrs: [
            ("dept".to_string(), AttrValue::from("eng")),
            // Never overwrites the pulled email.
            ("email".to_string(), AttrValue::from("default@example.com")),
        ]
        .into_iter()
        .collect(),
        ..Template::default()
    };
    let task = PullTask::full("hr").with_template(EntityKind::User, template);
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.created, 1);

    let dora = env
        .store
        .search(EntityKind::User, &[("name".to_string(), "dora".to_string())])
        .await
        .unwrap()
        .remove(0);
    assert_eq!(dora.attr("dept"), Some(&AttrValue::from("eng")));
    assert_eq!(dora.attr("email"), Some(&AttrValue::from("dora@example.com")));

    let implicit = env.store.dyn_memberships(&dora.key).await.unwrap();
    assert!(implicit.contains(&engineers.key));
}

#[tokio::test]
async fn successful_propagation_invalidates_only_mapped_virtuals() {
    let env = env().await;
    env.store
        .save_schema(EntityKind::User, SchemaDef::virtual_("groups"))
        .await
        .unwrap();
    let resource = Resource::new(ResourceProfile::new(
        "ldap",
        ConnectorConfig::new("mock", "1.0"),
    ))
    .with_provision(Provision::new(
        EntityKind::User,
        "account",
        Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("email", "mail"),
            MappingItem::new("groups", "memberOf"),
        ]),
    ));
    env.directory.register(resource).await.unwrap();

    let entity = Entity::new(EntityKind::User, "frank").with_resource("ldap");
    env.store.save(&entity).await.unwrap();
    env.cache
        .put(entity.key, "groups", vec!["stale".to_string()])
        .await;
    env.cache
        .put(entity.key, "licenses", vec!["e3".to_string()])
        .await;

    let statuses = env
        .orchestrator
        .propagate(
            &entity,
            Operation::Create,
            &BTreeSet::from(["ldap".to_string()]),
            ExecutionMode::Synchronous,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(statuses[0].status, ExecStatus::Success);

    assert!(
        env.cache.peek(entity.key, "groups").await.is_none(),
        "pushed virtual survived propagation"
    );
    assert_eq!(
        env.cache.peek(entity.key, "licenses").await,
        Some(vec!["e3".to_string()]),
        "unmapped virtual was dropped"
    );

    let calls = env.state.lock().unwrap().calls.clone();
    assert_eq!(calls, vec!["create:frank"]);
}

#[tokio::test]
async fn remediated_failures_keep_the_execution_successful() {
    let env = env().await;
    register_resource(&env, "hr").await;

    env.store
        .save(&Entity::new(EntityKind::User, "dup-a").with_attr("employeeId", "E-2"))
        .await
        .unwrap();
    env.store
        .save(&Entity::new(EntityKind::User, "dup-b").with_attr("employeeId", "E-2"))
        .await
        .unwrap();
    env.correlations
        .register(
            "by-employee-id",
            Arc::new(DefaultCorrelationRule::new(vec!["employeeId".to_string()])),
        )
        .await;

    env.state.lock().unwrap().objects = vec![
        remote_account("alice", "alice@example.com", "E-100"),
        remote_account("bob", "bob@example.com", "E-101"),
        remote_account("troubled", "troubled@example.com", "E-2"),
    ];

    let mut task = PullTask::full("hr");
    task.correlation_rule = Some("by-employee-id".to_string());
    env.engine.execute(&task).await.unwrap();

    let executions = env.tasks.executions(task.id).await.unwrap();
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].status, ExecStatus::Success);
    assert_eq!(executions[0].message, "[updated/failures]: 2/1");

    // The same failure without remediation fails the execution.
    let mut strict = PullTask::full("hr");
    strict.correlation_rule = Some("by-employee-id".to_string());
    strict.remediation = false;
    env.engine.execute(&strict).await.unwrap();

    let executions = env.tasks.executions(strict.id).await.unwrap();
    assert_eq!(executions[0].status, ExecStatus::Failure);
}

#[tokio::test]
async fn token_held_back_when_a_failure_is_not_remediated() {
    let env = env().await;
    register_resource(&env, "hr").await;

    env.store
        .save(&Entity::new(EntityKind::User, "dup-a").with_attr("employeeId", "E-2"))
        .await
        .unwrap();
    env.store
        .save(&Entity::new(EntityKind::User, "dup-b").with_attr("employeeId", "E-2"))
        .await
        .unwrap();
    env.correlations
        .register(
            "by-employee-id",
            Arc::new(DefaultCorrelationRule::new(vec!["employeeId".to_string()])),
        )
        .await;

    let object = remote_account("troubled", "troubled@example.com", "E-2");
    env.state.lock().unwrap().batch = Some(SyncBatch {
        events: vec![idflow_connector::SyncEvent::upsert(
            object.uid.clone(),
            "account",
            object.attributes.clone(),
        )],
        new_token: Some("t-9".to_string()),
    });

    let mut task = PullTask::full("hr").with_mode(PullMode::Incremental);
    task.correlation_rule = Some("by-employee-id".to_string());
    task.remediation = false;
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert!(
        env.tokens.get("hr", EntityKind::User).await.unwrap().is_none(),
        "token advanced past an unremediated failure"
    );

    // With remediation on, the event payload is preserved and the token
    // can move.
    let mut remediating = PullTask::full("hr").with_mode(PullMode::Incremental);
    remediating.correlation_rule = Some("by-employee-id".to_string());
    let summary = env.engine.execute(&remediating).await.unwrap();
    assert_eq!(summary.remediations, 1);
    assert_eq!(
        env.tokens.get("hr", EntityKind::User).await.unwrap().as_deref(),
        Some("t-9")
    );
}

#[tokio::test]
async fn second_execution_of_running_task_is_rejected() {
    let env = env().await;
    register_resource(&env, "hr").await;

    // Not running yet: cancel has nothing to stop.
    let task = PullTask::full("hr");
    assert!(!env.engine.cancel(task.id));

    // A finished run can be executed again.
    env.state.lock().unwrap().objects = vec![];
    env.engine.execute(&task).await.unwrap();
    env.engine.execute(&task).await.unwrap();
}

#[tokio::test]
async fn pulled_entities_propagate_to_other_assigned_resources() {
    let env = env().await;
    register_resource(&env, "hr").await;
    register_resource(&env, "ldap").await;

    env.state.lock().unwrap().objects =
        vec![remote_account("gina", "gina@example.com", "E-77")];

    let template = Template {
        resources: BTreeSet::from(["ldap".to_string()]),
        ..Template::default()
    };
    let task = PullTask::full("hr").with_template(EntityKind::User, template);
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.created, 1);

    let calls = env.state.lock().unwrap().calls.clone();
    assert!(
        calls.contains(&"create:gina".to_string()),
        "no onward propagation: {calls:?}"
    );
}

#[tokio::test]
async fn virtual_attribute_reads_are_served_from_cache_while_fresh() {
    let env = env().await;
    let resource = Resource::new(ResourceProfile::new(
        "dir",
        ConnectorConfig::new("mock", "1.0"),
    ))
    .with_provision(Provision::new(
        EntityKind::User,
        "account",
        Mapping::new(vec![
            MappingItem::new("name", "uid").as_conn_object_key(),
            MappingItem::new("groups", "memberOf"),
        ]),
    ));
    env.directory.register(resource).await.unwrap();

    let zoe = Entity::new(EntityKind::User, "zoe");
    env.state.lock().unwrap().objects = vec![RemoteObject::new(
        Uid::from_value("zoe"),
        "account",
        AttributeSet::new()
            .with("uid", "zoe")
            .with("memberOf", vec!["staff".to_string(), "vpn".to_string()]),
    )];

    let resolver = VirtualAttrResolver::new(
        env.gateway.clone(),
        env.directory.clone(),
        env.cache.clone(),
    );
    let values = resolver.values(&zoe, "dir", "groups").await.unwrap();
    assert_eq!(values, vec!["staff", "vpn"]);

    // The remote object disappears, but the fresh entry still answers.
    env.state.lock().unwrap().objects.clear();
    let cached = resolver.values(&zoe, "dir", "groups").await.unwrap();
    assert_eq!(cached, vec!["staff", "vpn"]);

    // After invalidation the next read goes back to the resource.
    env.cache.invalidate(zoe.key, "groups").await;
    let reloaded = resolver.values(&zoe, "dir", "groups").await.unwrap();
    assert!(reloaded.is_empty());
}

#[tokio::test]
async fn pull_respects_disabled_create() {
    let env = env().await;
    register_resource(&env, "hr").await;

    env.state.lock().unwrap().objects =
        vec![remote_account("henry", "henry@example.com", "E-88")];

    let mut task = PullTask::full("hr");
    task.perform_create = false;
    let summary = env.engine.execute(&task).await.unwrap();
    assert_eq!(summary.created, 0);
    assert_eq!(summary.ignored, 1);
    assert!(env
        .store
        .search(EntityKind::User, &[("name".to_string(), "henry".to_string())])
        .await
        .unwrap()
        .is_empty());
}
