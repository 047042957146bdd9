//! Kubernetes controller wiring
//!
//! Watches StreamDeployment resources, runs one reconcile turn per event,
//! and writes the resulting status back. Status writes go through a small
//! trait so reconcile tests never need an API server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::crd::{EngineConfig, StreamDeployment, StreamDeploymentStatus};
use crate::error::Error;
use crate::observer::Observer;
use crate::reconciler::{cluster_ref, run_turn, variant::variant_for, Reconciler};
use crate::retry::{retry, Backoff};
use crate::service::ControlPlane;
use crate::FIELD_MANAGER;

const REQUEUE_INTERVAL: Duration = Duration::from_secs(60);
const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(30);

/// Status writes against the API server
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StreamDeploymentStatus,
    ) -> Result<(), Error>;
}

pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &StreamDeploymentStatus,
    ) -> Result<(), Error> {
        let api: Api<StreamDeployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(
            name,
            &PatchParams::default(),
            &Patch::Merge(serde_json::json!({ "status": status })),
        )
        .await?;
        Ok(())
    }
}

/// Shared state handed to every reconcile invocation
pub struct Context {
    pub status_writer: Arc<dyn StatusWriter>,
    pub control_plane: Arc<dyn ControlPlane>,
    pub observer: Observer,
    pub reconciler: Reconciler,
    pub defaults: EngineConfig,
}

impl Context {
    pub fn new(
        status_writer: Arc<dyn StatusWriter>,
        control_plane: Arc<dyn ControlPlane>,
        defaults: EngineConfig,
    ) -> Self {
        Self {
            observer: Observer::new(control_plane.clone()),
            reconciler: Reconciler::new(control_plane.clone(), defaults.clone()),
            status_writer,
            control_plane,
            defaults,
        }
    }
}

pub async fn reconcile(dep: Arc<StreamDeployment>, ctx: Arc<Context>) -> Result<Action, Error> {
    let mut dep = (*dep).clone();
    let namespace = dep.namespace().unwrap_or_else(|| "default".to_string());
    let name = dep.name_any();

    if dep.metadata.deletion_timestamp.is_some() {
        return handle_deletion(&dep, &ctx).await;
    }

    run_turn(&ctx.observer, &ctx.reconciler, &mut dep).await;

    if let Some(status) = &dep.status {
        retry(&Backoff::default(), "patch status", || {
            ctx.status_writer.patch_status(&namespace, &name, status)
        })
        .await?;
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

async fn handle_deletion(dep: &StreamDeployment, ctx: &Context) -> Result<Action, Error> {
    if dep.was_reconciled() {
        let variant = variant_for(dep.spec.cluster_type);
        let cluster = variant.target_cluster(&cluster_ref(dep)?, &dep.spec)?;
        info!(cluster = %cluster, "deployment deleted, tearing down");
        let shutdown = crate::config::OperatorConfig::resolve(
            &ctx.defaults,
            &dep.spec.engine_config,
        )
        .shutdown_timeout()?;
        variant
            .stop(ctx.control_plane.as_ref(), &cluster, dep, false, shutdown)
            .await?;
    }
    Ok(Action::await_change())
}

pub fn error_policy(dep: Arc<StreamDeployment>, err: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        deployment = %dep.name_any(),
        error = %err,
        "reconcile failed, requeueing"
    );
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}

/// Install or update the StreamDeployment CRD via server-side apply
pub async fn ensure_crd(client: Client) -> Result<(), Error> {
    let api: Api<CustomResourceDefinition> = Api::all(client);
    let crd = StreamDeployment::crd();
    let name = crd.name_any();
    api.patch(
        &name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&crd),
    )
    .await?;
    info!(crd = %name, "custom resource definition applied");
    Ok(())
}

/// Run the controller until shutdown
pub async fn run(
    client: Client,
    control_plane: Arc<dyn ControlPlane>,
    defaults: EngineConfig,
) -> Result<(), Error> {
    ensure_crd(client.clone()).await?;

    let deployments: Api<StreamDeployment> = Api::all(client.clone());
    let ctx = Arc::new(Context::new(
        Arc::new(KubeStatusWriter::new(client)),
        control_plane,
        defaults,
    ));

    info!("starting StreamDeployment controller");
    Controller::new(deployments, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!(deployment = %obj.name, "reconciled"),
                Err(err) => warn!(error = %err, "reconcile error"),
            }
        })
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ClusterType, StreamDeploymentSpec};
    use crate::service::MockControlPlane;

    fn session_deployment() -> StreamDeployment {
        let mut dep = StreamDeployment::new(
            "analytics",
            StreamDeploymentSpec {
                cluster_type: ClusterType::Session,
                engine_config: Default::default(),
                job: None,
                session_cluster: None,
                restart_nonce: None,
            },
        );
        dep.metadata.namespace = Some("default".to_string());
        dep
    }

    fn context(control_plane: MockControlPlane, writer: MockStatusWriter) -> Arc<Context> {
        Arc::new(Context::new(
            Arc::new(writer),
            Arc::new(control_plane),
            Default::default(),
        ))
    }

    #[tokio::test]
    async fn first_reconcile_submits_and_patches_status() {
        let mut control_plane = MockControlPlane::new();
        control_plane
            .expect_submit()
            .times(1)
            .returning(|_| Ok(()));
        let mut writer = MockStatusWriter::new();
        writer
            .expect_patch_status()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let action = reconcile(Arc::new(session_deployment()), context(control_plane, writer))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(REQUEUE_INTERVAL));
    }

    #[tokio::test]
    async fn deletion_of_unreconciled_deployment_touches_nothing() {
        let mut dep = session_deployment();
        dep.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));
        let control_plane = MockControlPlane::new();
        let writer = MockStatusWriter::new();

        let action = reconcile(Arc::new(dep), context(control_plane, writer))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn deletion_stops_a_reconciled_cluster() {
        let mut dep = session_deployment();
        let spec = dep.spec.clone();
        dep.status_mut()
            .reconciliation_status
            .commit_spec(&spec)
            .unwrap();
        dep.metadata.deletion_timestamp =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                chrono::Utc::now(),
            ));

        let mut control_plane = MockControlPlane::new();
        control_plane
            .expect_stop()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let writer = MockStatusWriter::new();

        let action = reconcile(Arc::new(dep), context(control_plane, writer))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
    }
}
