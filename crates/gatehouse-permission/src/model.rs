use crate::config::ModelSource;
use crate::errors::PermissionResult;
use anyhow::Context;
use casbin::DefaultModel;

/// RBAC model used when no model file or text is configured.
pub const DEFAULT_MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && keyMatch2(r.obj, p.obj) && r.act == p.act
"#;

pub async fn load_model(source: &ModelSource) -> PermissionResult<DefaultModel> {
    let model = match source {
        ModelSource::Embedded => DefaultModel::from_str(DEFAULT_MODEL).await?,
        ModelSource::Text(text) => DefaultModel::from_str(text).await?,
        ModelSource::File(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("read model file: {}", path.display()))?;
            DefaultModel::from_str(&text).await?
        }
    };
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PermissionError;
    use casbin::Model;
    use std::path::PathBuf;

    #[tokio::test]
    async fn embedded_model_declares_policy_and_roles() {
        let model = load_model(&ModelSource::Embedded).await.expect("model");
        let data = model.get_model();
        assert!(data.contains_key("r"));
        assert!(data.contains_key("p"));
        assert!(data.contains_key("g"));
    }

    #[tokio::test]
    async fn inline_text_is_parsed() {
        let model = load_model(&ModelSource::Text(DEFAULT_MODEL.to_string()))
            .await
            .expect("model");
        assert!(model.get_model().contains_key("m"));
    }

    #[tokio::test]
    async fn missing_file_is_a_config_error() {
        let err = load_model(&ModelSource::File(PathBuf::from(
            "/nonexistent/gatehouse/model.conf",
        )))
        .await
        .err()
        .expect("loading a missing model file must fail");
        assert!(matches!(err, PermissionError::Config(_)));
    }
}
