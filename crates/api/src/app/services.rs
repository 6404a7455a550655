//! Service wiring: store, bus, issuer, verifier, evaluator, replica worker.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;

use scribe_auth::{
    CredentialIssuer, LocalVerifier, PasswordHasher, Permission, PermissionEvaluator, RefreshTokenDigester,
    ReplicaStore, Role, TokenCodec, UserDirectory, UserReplica, Verifier, normalize_email,
};
use scribe_core::UserId;
use scribe_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use scribe_infra::config::BootstrapAdmin;
use scribe_infra::{
    IdentityBackend, IdentityConfig, InMemoryIdentityStore, LifecyclePublisher, PostgresIdentityStore, RoleAdmin,
    RemoteIntrospector, ReplicaSynchronizer, ReplicaWorker, VerifierMode, WorkerHandle,
};

pub const ADMIN_ROLE: &str = "admin";

/// Permissions the identity service itself knows about; `admin` holds all of them.
pub const KNOWN_PERMISSIONS: &[&str] = &["users.read", "users.write", "roles.manage"];

/// Shared, immutable services handed to every handler.
pub struct AppServices {
    pub store: Arc<dyn IdentityBackend>,
    pub issuer: CredentialIssuer<Arc<dyn IdentityBackend>>,
    pub verifier: Arc<dyn Verifier>,
    pub evaluator: Arc<PermissionEvaluator<Arc<dyn IdentityBackend>>>,
    pub publisher: LifecyclePublisher,
    pub hasher: PasswordHasher,
}

/// Services plus the background pieces that must live as long as the server.
pub struct Runtime {
    pub services: Arc<AppServices>,
    pub synchronizer: Arc<ReplicaSynchronizer<Arc<dyn IdentityBackend>>>,
    pub replica_worker: WorkerHandle,
}

type Envelope = EventEnvelope<JsonValue>;

pub async fn build_services(config: &IdentityConfig) -> anyhow::Result<Runtime> {
    let store: Arc<dyn IdentityBackend> = match &config.database_url {
        Some(url) => {
            let pg = PostgresIdentityStore::connect(url).await.context("connect to postgres")?;
            pg.migrate().await.context("apply identity schema")?;
            tracing::info!("using postgres identity store");
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory identity store");
            Arc::new(InMemoryIdentityStore::new())
        }
    };

    let (publisher, subscription) = build_bus(config)?;

    let codec = TokenCodec::new(config.access.secret.as_bytes(), config.access.algorithm, config.access.ttl)?;
    let hasher = PasswordHasher::new(config.password_hash_cost)?;
    let issuer = CredentialIssuer::new(
        store.clone(),
        codec.clone(),
        RefreshTokenDigester::new(config.refresh.secret.as_bytes())?,
        hasher.clone(),
        config.refresh.ttl,
    )?;

    let verifier: Arc<dyn Verifier> = match &config.verifier {
        VerifierMode::Local => Arc::new(LocalVerifier::new(codec, store.clone())),
        VerifierMode::Remote {
            auth_service_url,
            timeout,
        } => {
            tracing::info!(url = %auth_service_url, "verifying credentials by introspection");
            Arc::new(RemoteIntrospector::new(auth_service_url, *timeout)?)
        }
    };

    let synchronizer = Arc::new(ReplicaSynchronizer::new(store.clone()));
    let replica_worker = ReplicaWorker::spawn("identity-replica", subscription, synchronizer.clone());

    let services = Arc::new(AppServices {
        evaluator: Arc::new(PermissionEvaluator::new(store.clone())),
        store,
        issuer,
        verifier,
        publisher,
        hasher,
    });

    seed_roles(&services).await?;
    if let Some(admin) = &config.bootstrap_admin {
        bootstrap_admin(&services, admin).await?;
    }

    Ok(Runtime {
        services,
        synchronizer,
        replica_worker,
    })
}

#[cfg(feature = "redis")]
fn build_bus(config: &IdentityConfig) -> anyhow::Result<(LifecyclePublisher, Subscription<Envelope>)> {
    if let Some(url) = &config.event_log.redis_url {
        let bus = scribe_infra::event_bus::RedisStreamsEventBus::new(url)?;
        let subscription = bus.subscribe_with_group(&config.event_log.consumer_group, &config.event_log.consumer_name);
        tracing::info!(
            group = %config.event_log.consumer_group,
            consumer = %config.event_log.consumer_name,
            "replicating from redis streams"
        );
        return Ok((LifecyclePublisher::new(bus), subscription));
    }
    Ok(in_memory_bus())
}

#[cfg(not(feature = "redis"))]
fn build_bus(config: &IdentityConfig) -> anyhow::Result<(LifecyclePublisher, Subscription<Envelope>)> {
    if config.event_log.redis_url.is_some() {
        tracing::warn!("REDIS_URL set but built without the redis feature; using in-process bus");
    }
    Ok(in_memory_bus())
}

/// In-process loopback: this service replicates its own lifecycle events.
fn in_memory_bus() -> (LifecyclePublisher, Subscription<Envelope>) {
    let bus: Arc<InMemoryEventBus<Envelope>> = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    (LifecyclePublisher::new(bus), subscription)
}

async fn seed_roles(services: &AppServices) -> anyhow::Result<()> {
    let all: Vec<Permission> = KNOWN_PERMISSIONS.iter().map(|p| Permission::new(*p)).collect();
    services
        .store
        .define_role(&Role::new(ADMIN_ROLE), &all)
        .await
        .context("seed admin role")?;
    Ok(())
}

/// Create the bootstrap admin unless a user with that email already exists.
async fn bootstrap_admin(services: &AppServices, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    let email = normalize_email(&admin.email);
    if let Some(existing) = services.store.find_by_email(&email).await? {
        tracing::info!(user_id = %existing.id, "bootstrap admin already present");
        return Ok(());
    }

    let row = UserReplica {
        id: UserId::new(),
        username: email.split('@').next().unwrap_or(&email).to_string(),
        email,
        password_hash: services.hasher.hash_async(&admin.password).await?,
        first_name: None,
        last_name: None,
        is_active: true,
        is_verified: true,
    };

    services.store.insert_if_absent(row.clone()).await?;
    services.store.grant_role(row.id, &Role::new(ADMIN_ROLE)).await?;
    services.publisher.user_created(row.clone());

    tracing::info!(user_id = %row.id, "bootstrap admin created");
    Ok(())
}
