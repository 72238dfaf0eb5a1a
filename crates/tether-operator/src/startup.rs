//! Startup utilities

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt};
use tether_common::crd::ExtensionConfig;
use tether_common::{Error, FIELD_MANAGER};

/// Install or update the ExtensionConfig CRD using server-side apply
///
/// The operator installs its own CRD on startup so the schema always matches
/// the running version.
pub async fn ensure_crds_installed(client: &Client) -> Result<(), Error> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing ExtensionConfig CRD...");
    crds.patch(
        ExtensionConfig::crd_name(),
        &params,
        &Patch::Apply(&ExtensionConfig::crd()),
    )
    .await?;

    Ok(())
}

/// ExtensionConfig CRD as YAML
pub fn crd_yaml() -> Result<String, Error> {
    serde_yaml::to_string(&ExtensionConfig::crd())
        .map_err(|e| Error::serialization_for_kind("CustomResourceDefinition", e.to_string()))
}
