//! Integration tests for keystone-roles

use keystone_cache::{DocumentCache, GatewayMessageBus, InMemoryBackend, InMemoryGateway};
use keystone_documents::{DocumentStore, InMemoryDocumentDb};
use keystone_roles::*;
use std::sync::Arc;
use std::time::Duration;

async fn node(backend: &Arc<InMemoryBackend>) -> RoleStore {
    let gateway = Arc::new(InMemoryGateway::new(backend.clone()));
    let bus = Arc::new(GatewayMessageBus::new(gateway.clone()));
    RoleStore::new(DocumentCache::builder(gateway, bus).build().await)
}

#[tokio::test]
async fn test_concurrent_role_creation_conflicts() {
    let backend = InMemoryBackend::new();
    let db = InMemoryDocumentDb::new();
    let roles = node(&backend).await;

    let mut first = DocumentStore::new(db.session());
    let mut second = DocumentStore::new(db.session());
    roles.create(&mut first, Role::new("Admin")).await.unwrap();
    roles.create(&mut second, Role::new("Editor")).await.unwrap();

    first.commit().await.unwrap();
    let err: RoleError = second.commit().await.unwrap_err().into();
    assert!(err.is_concurrency());

    let mut reader = DocumentStore::new(db.session());
    let names = roles.role_names(&mut reader).await.unwrap();
    assert_eq!(names, vec!["Admin"]);
}

#[tokio::test]
async fn test_role_created_on_one_node_is_found_on_another() {
    let backend = InMemoryBackend::new();
    let db = InMemoryDocumentDb::new();
    let node_a = node(&backend).await;
    let node_b = node(&backend).await;

    let mut scope = DocumentStore::new(db.session());
    assert!(node_b.find_by_name(&mut scope, "Admin").await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut scope = DocumentStore::new(db.session());
    node_a.create(&mut scope, Role::new("Admin")).await.unwrap();
    scope.commit().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut scope = DocumentStore::new(db.session());
    let found = node_b.find_by_name(&mut scope, "admin").await.unwrap();
    assert_eq!(found.map(|r| r.name), Some("Admin".to_string()));
}
