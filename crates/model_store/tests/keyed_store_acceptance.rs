use std::collections::BTreeMap;

use model_store::{KeyedStore, ModelDefinition, ModelError, Update};
use shared::{error::ErrorCode, protocol::MutationKind};

#[derive(Debug, Clone, PartialEq)]
struct Line {
    sku: String,
    quantity: u32,
}

type Cart = BTreeMap<String, Line>;

fn cart_model() -> ModelDefinition<Cart> {
    ModelDefinition::builder("cart", Cart::new())
        .transition("add_line", |cart: &Cart, (sku, quantity): (String, u32)| {
            let mut next = cart.clone();
            next.entry(sku.clone())
                .and_modify(|line| line.quantity += quantity)
                .or_insert(Line { sku, quantity });
            next
        })
        .expect("add_line")
        .transition("remove_line", |cart: &Cart, sku: String| {
            let mut next = cart.clone();
            next.remove(&sku);
            next
        })
        .expect("remove_line")
        .build()
}

#[tokio::test]
async fn cart_lifecycle_through_single_mutation_channel() {
    let store = KeyedStore::new();
    let cart = store.model(&cart_model()).expect("cart");
    let mut events = store.subscribe();

    assert!(cart.read().expect("default").is_empty());

    cart.invoke("add_line", ("apple", 2)).expect("add apples");
    cart.invoke("add_line", ("apple", 1)).expect("more apples");
    cart.invoke("add_line", ("pear", 4)).expect("add pears");
    cart.invoke("remove_line", "pear").expect("remove pears");
    cart.set_state(Update::apply(|cart: &Cart| {
        cart.iter()
            .map(|(sku, line)| {
                (
                    sku.clone(),
                    Line {
                        sku: line.sku.clone(),
                        quantity: line.quantity * 10,
                    },
                )
            })
            .collect()
    }))
    .expect("bulk update");

    let state = cart.read().expect("read");
    assert_eq!(state.len(), 1);
    assert_eq!(state["apple"].quantity, 30);

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.target_key, cart.key());
        kinds.push((event.kind, event.transition, event.revision));
    }
    assert_eq!(
        kinds,
        vec![
            (MutationKind::NamedTransition, Some("add_line".to_string()), 1),
            (MutationKind::NamedTransition, Some("add_line".to_string()), 2),
            (MutationKind::NamedTransition, Some("add_line".to_string()), 3),
            (MutationKind::NamedTransition, Some("remove_line".to_string()), 4),
            (MutationKind::Replace, None, 5),
        ]
    );
}

#[tokio::test]
async fn misuse_fails_fast_with_configuration_errors() {
    let store = KeyedStore::new();
    let cart = store.model(&cart_model()).expect("cart");

    let unknown = cart.invoke("checkout", ()).expect_err("unknown");
    assert_eq!(unknown.code(), ErrorCode::UnknownTransition);
    assert!(unknown.code().is_programmer_error());

    drop(store);
    let missing = cart.read().expect_err("missing store");
    assert!(matches!(missing, ModelError::MissingStoreSubtree { .. }));
}
