use dentra_types::{OutboxId, ResourceId, ResourceIdentity, TempId};
use std::str::FromStr;

// ── TempId ───────────────────────────────────────────────────────

#[test]
fn temp_ids_are_unique() {
    let a = TempId::new();
    let b = TempId::new();
    assert_ne!(a, b);
}

#[test]
fn temp_id_display_parse_roundtrip() {
    let id = TempId::new();
    let parsed = TempId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn temp_id_from_str() {
    let id = TempId::new();
    let parsed = TempId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn temp_id_parse_rejects_garbage() {
    assert!(TempId::parse("not-a-uuid").is_err());
}

#[test]
fn temp_id_serde_is_transparent() {
    let id = TempId::new();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, format!("\"{id}\""));
    let parsed: TempId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn temp_ids_are_time_ordered() {
    // UUID v7 embeds a timestamp, so ids minted in sequence sort in order.
    let a = TempId::new();
    let b = TempId::new();
    assert!(a.as_uuid() <= b.as_uuid());
}

// ── OutboxId ─────────────────────────────────────────────────────

#[test]
fn outbox_id_roundtrip() {
    let id = OutboxId::new();
    let parsed = OutboxId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

// ── ResourceId ───────────────────────────────────────────────────

#[test]
fn resource_id_is_opaque() {
    let id = ResourceId::new("inv-42");
    assert_eq!(id.as_str(), "inv-42");
    assert_eq!(id.to_string(), "inv-42");
}

#[test]
fn resource_id_from_conversions() {
    assert_eq!(ResourceId::from("p-1"), ResourceId::new("p-1"));
    assert_eq!(ResourceId::from("p-1".to_string()), ResourceId::new("p-1"));
}

#[test]
fn resource_id_serde_is_transparent() {
    let id = ResourceId::new("inv-42");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"inv-42\"");
}

// ── ResourceIdentity ─────────────────────────────────────────────

#[test]
fn identity_is_exactly_one_of_temp_or_real() {
    let temp = ResourceIdentity::Temp(TempId::new());
    assert!(temp.temp_id().is_some());
    assert!(temp.real_id().is_none());

    let real = ResourceIdentity::Real(ResourceId::new("inv-42"));
    assert!(real.temp_id().is_none());
    assert_eq!(real.real_id().unwrap().as_str(), "inv-42");
}

#[test]
fn identity_storage_keys_do_not_collide() {
    let temp = ResourceIdentity::Temp(TempId::new());
    let real = ResourceIdentity::Real(ResourceId::new("inv-42"));
    assert!(temp.storage_key().starts_with("temp:"));
    assert!(real.storage_key().starts_with("real:"));
    assert_ne!(temp.storage_key(), real.storage_key());
}

#[test]
fn identity_serde_roundtrip() {
    let real = ResourceIdentity::Real(ResourceId::new("inv-42"));
    let json = serde_json::to_string(&real).unwrap();
    let parsed: ResourceIdentity = serde_json::from_str(&json).unwrap();
    assert_eq!(real, parsed);
}
