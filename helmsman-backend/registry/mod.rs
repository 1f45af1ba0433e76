//! Node registry rules layered over plain store CRUD.
//!
//! The one non-trivial rule lives here: NPU workers get a seeded
//! `extra_data.npu` subtree on assignment and lose it on unassignment.

use std::sync::Arc;

use crate::error::Result;
use crate::store::Store;
use crate::store::nodes::{AssignmentType, CodeStatus, Node, NodeRole};

pub const NPU_ROLE: &str = "npu-worker";

pub struct NodeRegistry {
    store: Arc<Store>,
}

impl NodeRegistry {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn assign_role(
        &self,
        node_id: &str,
        role_name: &str,
        assignment_type: AssignmentType,
    ) -> Result<NodeRole> {
        let assignment = self
            .store
            .assign_role(node_id, role_name, assignment_type)
            .await?;

        if role_name == NPU_ROLE {
            let node = self.store.get_node(node_id).await?;
            let mut extra = node.extra_data;
            extra["npu"] = serde_json::json!({
                "detection_status": "PENDING",
                "capabilities": null,
                "loaded_models": [],
                "queue_depth": 0,
            });
            self.store.set_extra_data(node_id, &extra).await?;
            tracing::info!(node_id = %node_id, "seeded npu worker state");
        }

        Ok(assignment)
    }

    pub async fn unassign_role(&self, node_id: &str, role_name: &str) -> Result<()> {
        self.store.unassign_role(node_id, role_name).await?;

        if role_name == NPU_ROLE {
            let node = self.store.get_node(node_id).await?;
            let mut extra = node.extra_data;
            if let Some(obj) = extra.as_object_mut() {
                obj.remove("npu");
            }
            self.store.set_extra_data(node_id, &extra).await?;
        }

        Ok(())
    }

    /// Drift-detector hook: flip a node's code status from outside.
    pub async fn set_code_status(&self, node_id: &str, status: CodeStatus) -> Result<()> {
        self.store.set_code_status(node_id, status, None).await
    }

    pub async fn node_with_roles(&self, node_id: &str) -> Result<(Node, Vec<NodeRole>)> {
        let node = self.store.get_node(node_id).await?;
        let roles = self.store.list_node_roles(node_id).await?;
        Ok((node, roles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::nodes::NewNode;
    use crate::store::roles::NewRole;

    async fn registry() -> NodeRegistry {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store
            .register_node(NewNode {
                node_id: "npu-01".to_string(),
                ip_address: "10.0.0.7".to_string(),
                hostname: None,
                ssh_user: None,
                ssh_port: None,
                extra_data: Some(serde_json::json!({ "rack": "b2" })),
            })
            .await
            .unwrap();
        for name in [NPU_ROLE, "backend"] {
            store
                .create_role(NewRole {
                    name: name.to_string(),
                    source_paths: vec!["src/".to_string()],
                    target_path: "/srv/app".to_string(),
                    post_sync_cmd: None,
                    auto_restart: false,
                    systemd_service: None,
                })
                .await
                .unwrap();
        }
        NodeRegistry::new(store)
    }

    #[tokio::test]
    async fn npu_assignment_seeds_extra_data() {
        let registry = registry().await;
        registry
            .assign_role("npu-01", NPU_ROLE, AssignmentType::Manual)
            .await
            .unwrap();

        let (node, roles) = registry.node_with_roles("npu-01").await.unwrap();
        assert_eq!(roles.len(), 1);
        let npu = &node.extra_data["npu"];
        assert_eq!(npu["detection_status"], "PENDING");
        assert!(npu["capabilities"].is_null());
        assert_eq!(npu["loaded_models"], serde_json::json!([]));
        assert_eq!(npu["queue_depth"], 0);
        // Pre-existing extra data survives.
        assert_eq!(node.extra_data["rack"], "b2");
    }

    #[tokio::test]
    async fn npu_unassignment_removes_subtree() {
        let registry = registry().await;
        registry
            .assign_role("npu-01", NPU_ROLE, AssignmentType::Manual)
            .await
            .unwrap();
        registry.unassign_role("npu-01", NPU_ROLE).await.unwrap();

        let (node, roles) = registry.node_with_roles("npu-01").await.unwrap();
        assert!(roles.is_empty());
        assert!(node.extra_data.get("npu").is_none());
        assert_eq!(node.extra_data["rack"], "b2");
    }

    #[tokio::test]
    async fn non_npu_roles_leave_extra_data_alone() {
        let registry = registry().await;
        registry
            .assign_role("npu-01", "backend", AssignmentType::Manual)
            .await
            .unwrap();
        let (node, _) = registry.node_with_roles("npu-01").await.unwrap();
        assert!(node.extra_data.get("npu").is_none());
    }
}
