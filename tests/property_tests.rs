//! Property-based tests for fhir-graph using proptest.
//!
//! These tests verify invariants that must hold for all possible inputs,
//! finding edge cases that unit tests might miss.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;

use fhir_graph::aggregate::reference_type;
use fhir_graph::graph::JoinPath;
use fhir_graph::store::ResourceStore;
use fhir_graph::types::{InsertOutcome, Resource, ResourceKey};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_resource_type() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Patient".to_string()),
        Just("Specimen".to_string()),
        Just("Observation".to_string()),
        Just("ResearchStudy".to_string()),
        Just("DocumentReference".to_string()),
    ]
}

fn arb_id() -> impl Strategy<Value = String> {
    "[A-Za-z0-9\\-\\.]{1,24}"
}

fn arb_resource() -> impl Strategy<Value = (String, String, u32)> {
    (arb_resource_type(), "[a-c]{1,2}", any::<u32>())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn first_write_wins_for_every_key(inserts in prop::collection::vec(arb_resource(), 0..40)) {
        let store = ResourceStore::in_memory().unwrap();
        let mut expected: BTreeMap<ResourceKey, u32> = BTreeMap::new();

        for (resource_type, id, marker) in &inserts {
            let outcome = store
                .insert_document(json!({"resourceType": resource_type, "id": id, "marker": marker}))
                .unwrap();
            let key = ResourceKey::new(resource_type.as_str(), id.as_str());
            let fresh = !expected.contains_key(&key);
            expected.entry(key).or_insert(*marker);
            prop_assert_eq!(outcome == InsertOutcome::Inserted, fresh);
        }

        prop_assert_eq!(store.count().unwrap(), expected.len());
        for (key, marker) in &expected {
            let stored = store.get(key).unwrap().unwrap();
            prop_assert_eq!(&stored.document()["marker"], &json!(marker));
        }

        let total: usize = store.counts_by_type().unwrap().values().sum();
        prop_assert_eq!(total, expected.len());
    }
}

// ---------------------------------------------------------------------------
// Join-key paths
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn id_paths_yield_type_qualified_keys(resource_type in arb_resource_type(), id in arb_id()) {
        let resource = Resource::from_document(json!({"resourceType": resource_type, "id": id})).unwrap();
        let path = JoinPath::parse(&format!("{resource_type}.id")).unwrap();
        let key = path.join_key(&resource, &resource_type);
        prop_assert_eq!(key, Some(format!("{resource_type}/{id}")));
    }

    #[test]
    fn reference_paths_pass_values_through(id in arb_id()) {
        let reference = format!("Patient/{id}");
        let resource = Resource::from_document(json!({
            "resourceType": "Specimen",
            "id": "s",
            "subject": {"reference": reference}
        }))
        .unwrap();
        let path = JoinPath::parse("Specimen.subject.reference").unwrap();
        prop_assert_eq!(path.join_key(&resource, "Specimen"), Some(reference));
    }

    #[test]
    fn paths_rooted_elsewhere_never_match(id in arb_id()) {
        let resource = Resource::from_document(json!({"resourceType": "Patient", "id": id})).unwrap();
        let path = JoinPath::parse("Specimen.id").unwrap();
        prop_assert_eq!(path.join_key(&resource, "Specimen"), None);
    }
}

// ---------------------------------------------------------------------------
// Reference parsing
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn reference_type_handles_relative_absolute_and_versioned(
        resource_type in arb_resource_type(),
        id in arb_id(),
        version in 1u32..50,
    ) {
        let relative = format!("{resource_type}/{id}");
        let absolute = format!("https://fhir.example.org/R4/{resource_type}/{id}");
        let versioned = format!("{relative}/_history/{version}");
        prop_assert_eq!(reference_type(&relative), Some(resource_type.as_str()));
        prop_assert_eq!(reference_type(&absolute), Some(resource_type.as_str()));
        prop_assert_eq!(reference_type(&versioned), Some(resource_type.as_str()));
    }

    #[test]
    fn reference_type_ignores_slashless_references(id in "[A-Za-z0-9\\-]{1,24}") {
        let contained = format!("#{id}");
        let urn = format!("urn:uuid:{id}");
        prop_assert_eq!(reference_type(&contained), None);
        prop_assert_eq!(reference_type(&urn), None);
    }
}
