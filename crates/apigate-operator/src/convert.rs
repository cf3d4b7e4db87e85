//! Offline APIRule manifest conversion between v1beta1 and v2alpha1

use std::collections::BTreeMap;

use anyhow::{anyhow, Context as _};
use clap::ValueEnum;
use serde_json::{json, Value};

use apigate_common::crd::v2alpha1::APIRuleSpecV2Alpha1;
use apigate_common::crd::APIRuleSpec;
use apigate_controller::conversion::{to_v1beta1, to_v2alpha1};

const GROUP: &str = "gateway.kyma-project.io";

/// Target schema version
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Version {
    /// gateway.kyma-project.io/v1beta1
    V1beta1,
    /// gateway.kyma-project.io/v2alpha1
    V2alpha1,
}

/// Convert one APIRule manifest (YAML or JSON) to `target`
pub fn convert_manifest(raw: &str, target: Version) -> anyhow::Result<Value> {
    let manifest: Value = serde_yaml::from_str(raw).context("manifest is not valid YAML")?;
    let mut metadata = manifest.get("metadata").cloned().unwrap_or_else(|| json!({}));
    let spec = manifest.get("spec").cloned().unwrap_or_else(|| json!({}));

    let (api_version, spec) = match target {
        Version::V2alpha1 => {
            let spec: APIRuleSpec =
                serde_json::from_value(spec).context("spec is not a v1beta1 APIRule spec")?;
            let converted = to_v2alpha1(&spec)?;
            ("v2alpha1", serde_json::to_value(converted)?)
        }
        Version::V1beta1 => {
            let spec: APIRuleSpecV2Alpha1 =
                serde_json::from_value(spec).context("spec is not a v2alpha1 APIRule spec")?;
            let annotations: BTreeMap<String, String> = metadata
                .get("annotations")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .context("annotations must be a string map")?
                .unwrap_or_default();
            let (converted, annotations) = to_v1beta1(&spec, &annotations)?;
            metadata
                .as_object_mut()
                .ok_or_else(|| anyhow!("metadata must be a map"))?
                .insert("annotations".to_string(), serde_json::to_value(annotations)?);
            ("v1beta1", serde_json::to_value(converted)?)
        }
    };

    Ok(json!({
        "apiVersion": format!("{GROUP}/{api_version}"),
        "kind": "APIRule",
        "metadata": metadata,
        "spec": spec,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const V1BETA1: &str = r#"
apiVersion: gateway.kyma-project.io/v1beta1
kind: APIRule
metadata:
  name: httpbin
  namespace: default
spec:
  host: httpbin.example.com
  gateway: kyma-system/kyma-gateway
  service:
    name: httpbin
    port: 8000
  rules:
    - path: /headers
      methods: ["GET"]
      accessStrategies:
        - handler: no_auth
"#;

    #[test]
    fn v1beta1_manifest_converts_to_v2alpha1() {
        let out = convert_manifest(V1BETA1, Version::V2alpha1).expect("convertible");
        assert_eq!(out["apiVersion"], "gateway.kyma-project.io/v2alpha1");
        assert_eq!(out["metadata"]["name"], "httpbin");
        assert_eq!(out["spec"]["hosts"][0], "httpbin.example.com");
        assert_eq!(out["spec"]["rules"][0]["noAuth"], true);
    }

    #[test]
    fn v2alpha1_manifest_records_original_version() {
        let v2 = convert_manifest(V1BETA1, Version::V2alpha1).expect("convertible");
        let raw = serde_json::to_string(&v2).expect("serializable");
        let back = convert_manifest(&raw, Version::V1beta1).expect("convertible");
        assert_eq!(back["apiVersion"], "gateway.kyma-project.io/v1beta1");
        assert_eq!(back["spec"]["host"], "httpbin.example.com");
        assert_eq!(
            back["metadata"]["annotations"]["gateway.kyma-project.io/original-version"],
            "v2alpha1"
        );
    }

    #[test]
    fn oathkeeper_only_handler_is_rejected() {
        let raw = V1BETA1.replace("no_auth", "oauth2_introspection");
        let err = convert_manifest(&raw, Version::V2alpha1).expect_err("not representable");
        assert!(err.to_string().contains("oauth2_introspection"));
    }
}
