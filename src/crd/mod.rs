//! Custom Resource Definitions for the FeatureGate controller

mod feature_gate;
mod types;

pub use feature_gate::{object_key, object_ref, split_key, FeatureGate, FeatureGateSpec};
pub use types::{FeatureLists, FeatureSelection};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tracing::info;

/// Field manager used when applying the CRD
pub const FIELD_MANAGER: &str = "featuregate-controller";

/// Apply the FeatureGate CRD with server-side apply so the installed schema
/// always matches this binary
pub async fn ensure_crd_installed(client: &Client) -> crate::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    info!(crd = FeatureGate::crd_name(), "installing FeatureGate CRD");
    crds.patch(
        FeatureGate::crd_name(),
        &params,
        &Patch::Apply(&FeatureGate::crd()),
    )
    .await?;
    Ok(())
}
