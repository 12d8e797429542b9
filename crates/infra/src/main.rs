//! Demo: drive the container repository and print the resulting tree.
//!
//! Configuration comes from `BOXTREE_*` environment variables, logging from
//! `RUST_LOG` / `BOXTREE_LOG_FORMAT`.

use std::time::Duration;

use anyhow::Context;
use tracing::info;

use boxtree_boxes::{AddItem, ContainerCommand, CreateContainer, RemoveItem, RenameContainer};
use boxtree_core::{ContainerId, ItemId};
use boxtree_events::DomainEvent;
use boxtree_infra::projections::TreeNode;
use boxtree_infra::{RuntimeConfig, TreeRuntime};

fn main() -> anyhow::Result<()> {
    boxtree_observability::init();

    let config = RuntimeConfig::from_env().context("reading configuration")?;
    let runtime = TreeRuntime::start(&config).context("starting runtime")?;
    let repo = runtime.repository();

    let groceries = ContainerId::generate();
    let hardware = ContainerId::generate();
    let milk = ItemId::generate();

    let commands = vec![
        ContainerCommand::Create(CreateContainer {
            container_id: groceries.clone(),
            title: "Groceries".to_string(),
        }),
        ContainerCommand::AddItem(AddItem {
            container_id: groceries.clone(),
            item_id: milk.clone(),
            title: "Milk".to_string(),
        }),
        ContainerCommand::AddItem(AddItem {
            container_id: groceries.clone(),
            item_id: ItemId::generate(),
            title: "Eggs".to_string(),
        }),
        ContainerCommand::Create(CreateContainer {
            container_id: hardware.clone(),
            title: "Hardware".to_string(),
        }),
        ContainerCommand::Rename(RenameContainer {
            container_id: hardware.clone(),
            title: "Tools".to_string(),
        }),
        ContainerCommand::RemoveItem(RemoveItem {
            container_id: groceries.clone(),
            item_id: milk,
        }),
    ];

    for command in commands {
        repo.execute(command).context("executing command")?;
    }

    // A relayed event for a container the tree has not seen yet.
    let late = ContainerId::generate();
    runtime
        .bus()
        .publish(&DomainEvent::item_added(late.clone(), ItemId::generate(), "Hammer"))?;
    runtime
        .bus()
        .publish(&DomainEvent::container_created(late, "Late box"))?;

    let delivered = runtime.pump();
    info!(delivered, stats = ?runtime.tree().stats(), "tree updated");

    for node in runtime.tree().nodes() {
        print_node(&node, 0);
    }

    if !repo.settle(Duration::from_secs(5)) {
        anyhow::bail!("persistence did not settle in time");
    }
    info!(stats = ?repo.persistence_stats(), bus = ?runtime.bus().stats(), "done");
    Ok(())
}

fn print_node(node: &TreeNode, depth: usize) {
    println!("{:indent$}{}", "", node.title(), indent = depth * 2);
    for child in node.children() {
        print_node(&child, depth + 1);
    }
}
