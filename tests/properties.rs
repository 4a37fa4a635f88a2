//! Property-style tests for invariants that should hold over a broad space
//! of inputs rather than a single fixed example.

use proptest::prelude::*;
use udm_pipeline::entity::{guid_for, EntityType, Provider};
use udm_pipeline::relationship::{RelationshipManager, RelationshipType};

fn arb_entity_type() -> impl Strategy<Value = EntityType> {
    prop_oneof![
        Just(EntityType::Cluster),
        Just(EntityType::Broker),
        Just(EntityType::Topic),
        Just(EntityType::Queue),
        Just(EntityType::ConsumerGroup),
    ]
}

fn arb_provider() -> impl Strategy<Value = Provider> {
    prop_oneof![
        Just(Provider::Kafka),
        Just(Provider::RabbitMq),
        Just(Provider::Sqs),
        Just(Provider::AzureServiceBus),
        Just(Provider::GooglePubSub),
        Just(Provider::Generic),
    ]
}

proptest! {
    #[test]
    fn guid_for_is_a_total_deterministic_function(
        account_id in 0u64..1_000_000,
        entity_type in arb_entity_type(),
        provider in arb_provider(),
        ident in "[a-z0-9-]{1,20}",
    ) {
        let a = guid_for(entity_type, account_id, provider, &[&ident]);
        let b = guid_for(entity_type, account_id, provider, &[&ident]);
        prop_assert_eq!(a, b);
    }

    #[test]
    fn guid_for_differs_when_identity_differs(
        account_id in 0u64..1_000_000,
        provider in arb_provider(),
        ident_a in "[a-z0-9-]{1,20}",
        ident_b in "[a-z0-9-]{1,20}",
    ) {
        prop_assume!(ident_a != ident_b);
        let a = guid_for(EntityType::Cluster, account_id, provider, &[&ident_a]);
        let b = guid_for(EntityType::Cluster, account_id, provider, &[&ident_b]);
        prop_assert_ne!(a, b);
    }

    #[test]
    fn relationship_symmetry_holds_for_arbitrary_guid_pairs(
        source in "[a-z]{1,10}",
        target in "[a-z]{1,10}",
    ) {
        prop_assume!(source != target);
        let manager = RelationshipManager::new();
        manager.add_relationship(&source, &target, RelationshipType::ProducesTo, Default::default()).unwrap();

        let from_source = manager.get_related(&source, None, 1);
        prop_assert!(from_source.iter().any(|e| e.other_guid == target && e.rel_type == RelationshipType::ProducesTo));

        let from_target = manager.get_related(&target, None, 1);
        prop_assert!(from_target.iter().any(|e| e.other_guid == source && e.rel_type == RelationshipType::ConsumesFrom));
    }
}
