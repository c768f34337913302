//! `mentor tools` — List built-in tools.

use std::sync::Arc;

use mentor_storage::InMemoryStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // The registry only needs stores to construct handlers; a throwaway
    // in-memory store is enough for listing.
    let store = Arc::new(InMemoryStore::new());
    let registry = mentor_tools::default_registry(store.clone(), store);

    println!("Built-in tools ({})", registry.len());
    println!("==================");
    for def in registry.definitions() {
        let gated = registry
            .get(&def.name)
            .is_some_and(|t| t.requires_confirmation());
        println!();
        println!(
            "  {}{}",
            def.name,
            if gated { "  (requires confirmation)" } else { "" }
        );
        println!("    {}", def.description);
    }

    Ok(())
}
