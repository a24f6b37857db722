use crate::server::auth::token::TokenVerifier;
use crate::server::cluster::labels::PlatformLabels;
use crate::server::cluster::retry::ConflictRetry;
use crate::server::cluster::{ClusterApi, KubeCluster};
use crate::server::rollout::BlueGreenController;
use crate::server::settings::Settings;
use crate::server::status::StatusReporter;
use crate::server::tenant::manifests::TenantManifests;
use crate::server::tenant::notify::{NoopNotifier, Notifier, WebhookNotifier};
use crate::server::tenant::store::{PgTenantStore, TenantStore};
use crate::server::tenant::{OnboardingService, TenantProvisioner};
use crate::server::workload::builder::{ResourceDefaults, WorkloadBuilder};
use crate::server::workload::WorkloadReconciler;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

/// Full state for HTTP server
#[derive(Clone)]
pub struct AppState {
    pub token_verifier: Arc<TokenVerifier>,
    pub reconciler: Arc<WorkloadReconciler>,
    pub rollout: Arc<BlueGreenController>,
    pub status: Arc<StatusReporter>,
    pub onboarding: Arc<OnboardingService>,
}

impl AppState {
    /// Run database migrations
    async fn run_migrations(pool: &PgPool) -> Result<()> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .context("Failed to run migrations")?;
        tracing::info!("Migrations completed successfully");
        Ok(())
    }

    /// Initialize full state for HTTP server
    pub async fn new_for_server(settings: &Settings) -> Result<Self> {
        tracing::info!(
            "Connecting to PostgreSQL with {} max connections...",
            settings.database.max_connections
        );
        let db_pool = PgPoolOptions::new()
            .max_connections(settings.database.max_connections)
            .connect(&settings.database.url)
            .await
            .context("Failed to connect to PostgreSQL")?;
        tracing::info!("Successfully connected to PostgreSQL");

        Self::run_migrations(&db_pool).await?;

        let cluster = KubeCluster::try_default(Duration::from_secs(
            settings.kubernetes.request_timeout_secs,
        ))
        .await
        .context("Failed to create Kubernetes client")?;
        tracing::info!(
            platform_id = %settings.kubernetes.platform_id,
            "Connected to Kubernetes API"
        );

        let notifier: Arc<dyn Notifier> = match &settings.notifications.webhook_url {
            Some(url) if !url.is_empty() => {
                tracing::info!("Onboarding notifications will be posted to {}", url);
                Arc::new(WebhookNotifier::new(
                    url.clone(),
                    Duration::from_secs(settings.notifications.timeout_secs),
                )?)
            }
            _ => {
                tracing::info!("No notification webhook configured");
                Arc::new(NoopNotifier)
            }
        };

        Self::assemble(
            settings,
            Arc::new(cluster),
            Arc::new(PgTenantStore::new(db_pool)),
            notifier,
        )
    }

    /// Wire the components on top of a cluster client, a tenant store and a notifier.
    pub fn assemble(
        settings: &Settings,
        cluster: Arc<dyn ClusterApi>,
        store: Arc<dyn TenantStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let token_verifier = TokenVerifier::new(
            &settings.server.jwt_secret,
            settings.server.jwt_issuer.clone(),
        )
        .context("Failed to initialize token verifier")?;

        let labels = PlatformLabels::new(settings.kubernetes.platform_id.clone());
        let reconciler = WorkloadReconciler::new(
            cluster.clone(),
            WorkloadBuilder::new(
                labels.clone(),
                ResourceDefaults::from(&settings.workload),
            ),
            ConflictRetry::with_max_attempts(settings.kubernetes.conflict_retries),
        );
        let rollout = BlueGreenController::new(reconciler.clone());
        let status = StatusReporter::new(cluster.clone(), labels.clone());

        let provisioner = TenantProvisioner::new(
            cluster,
            TenantManifests::new(
                labels,
                settings.tenants.quota.clone(),
                settings.tenants.limits.clone(),
            ),
        );
        let onboarding = OnboardingService::new(
            store,
            Arc::new(provisioner),
            notifier,
            settings.tenants.namespace_prefix.clone(),
            Duration::from_secs(settings.tenants.provisioning_timeout_secs),
        );

        Ok(Self {
            token_verifier: Arc::new(token_verifier),
            reconciler: Arc::new(reconciler),
            rollout: Arc::new(rollout),
            status: Arc::new(status),
            onboarding: Arc::new(onboarding),
        })
    }
}
