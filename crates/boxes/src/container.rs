use serde::{Deserialize, Serialize};

use boxtree_core::{Aggregate, AggregateRoot, ContainerId, DomainError, ItemId};
use boxtree_events::DomainEvent;

/// Lifecycle of a container aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Not created yet (fresh instance).
    Absent,
    Present,
    /// Terminal.
    Removed,
}

/// An item as owned by the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerItem {
    pub item_id: ItemId,
    pub title: String,
}

/// Aggregate root: Container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    id: ContainerId,
    title: String,
    items: Vec<ContainerItem>,
    state: ContainerState,
    version: u64,
}

impl Container {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ContainerId) -> Self {
        Self {
            id,
            title: String::new(),
            items: Vec::new(),
            state: ContainerState::Absent,
            version: 0,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn items(&self) -> &[ContainerItem] {
        &self.items
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn contains_item(&self, item_id: &ItemId) -> bool {
        self.items.iter().any(|i| &i.item_id == item_id)
    }
}

impl AggregateRoot for Container {
    type Id = ContainerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateContainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateContainer {
    pub container_id: ContainerId,
    pub title: String,
}

/// Command: RenameContainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameContainer {
    pub container_id: ContainerId,
    pub title: String,
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub container_id: ContainerId,
    pub item_id: ItemId,
    pub title: String,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub container_id: ContainerId,
    pub item_id: ItemId,
}

/// Command: RemoveContainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveContainer {
    pub container_id: ContainerId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerCommand {
    Create(CreateContainer),
    Rename(RenameContainer),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    Remove(RemoveContainer),
}

impl ContainerCommand {
    pub fn container_id(&self) -> &ContainerId {
        match self {
            ContainerCommand::Create(c) => &c.container_id,
            ContainerCommand::Rename(c) => &c.container_id,
            ContainerCommand::AddItem(c) => &c.container_id,
            ContainerCommand::RemoveItem(c) => &c.container_id,
            ContainerCommand::Remove(c) => &c.container_id,
        }
    }
}

impl Aggregate for Container {
    type Command = ContainerCommand;
    type Event = DomainEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DomainEvent::ContainerCreated(e) => {
                self.id = e.container_id.clone();
                self.title = e.title.clone();
                self.items.clear();
                self.state = ContainerState::Present;
            }
            DomainEvent::ContainerRenamed(e) => {
                self.title = e.title.clone();
            }
            DomainEvent::ContainerRemoved(_) => {
                self.items.clear();
                self.state = ContainerState::Removed;
            }
            DomainEvent::ItemAdded(e) => {
                self.items.push(ContainerItem {
                    item_id: e.item_id.clone(),
                    title: e.title.clone(),
                });
            }
            DomainEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.item_id != e.item_id);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        self.ensure_container_id(command.container_id())?;

        let event = match command {
            ContainerCommand::Create(cmd) => self.handle_create(cmd)?,
            ContainerCommand::Rename(cmd) => self.handle_rename(cmd)?,
            ContainerCommand::AddItem(cmd) => self.handle_add_item(cmd)?,
            ContainerCommand::RemoveItem(cmd) => self.handle_remove_item(cmd)?,
            ContainerCommand::Remove(cmd) => self.handle_remove(cmd)?,
        };
        Ok(vec![event])
    }
}

impl Container {
    fn ensure_container_id(&self, container_id: &ContainerId) -> Result<(), DomainError> {
        if &self.id != container_id {
            return Err(DomainError::invariant("container_id mismatch"));
        }
        Ok(())
    }

    fn ensure_present(&self) -> Result<(), DomainError> {
        match self.state {
            ContainerState::Present => Ok(()),
            ContainerState::Absent => Err(DomainError::not_found(format!("container {}", self.id))),
            ContainerState::Removed => Err(DomainError::not_found(format!(
                "container {} was removed",
                self.id
            ))),
        }
    }

    fn validate_title(title: &str) -> Result<(), DomainError> {
        if title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateContainer) -> Result<DomainEvent, DomainError> {
        match self.state {
            ContainerState::Absent => {}
            ContainerState::Present => return Err(DomainError::conflict("container already exists")),
            ContainerState::Removed => {
                return Err(DomainError::conflict("container id belongs to a removed container"));
            }
        }
        ContainerId::parse(cmd.container_id.as_str())?;
        Self::validate_title(&cmd.title)?;

        Ok(DomainEvent::container_created(cmd.container_id.clone(), cmd.title.clone()))
    }

    fn handle_rename(&self, cmd: &RenameContainer) -> Result<DomainEvent, DomainError> {
        self.ensure_present()?;
        Self::validate_title(&cmd.title)?;

        Ok(DomainEvent::container_renamed(cmd.container_id.clone(), cmd.title.clone()))
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<DomainEvent, DomainError> {
        self.ensure_present()?;
        ItemId::parse(cmd.item_id.as_str())?;
        Self::validate_title(&cmd.title)?;

        if self.contains_item(&cmd.item_id) {
            return Err(DomainError::conflict(format!("item {} already in container", cmd.item_id)));
        }

        Ok(DomainEvent::item_added(
            cmd.container_id.clone(),
            cmd.item_id.clone(),
            cmd.title.clone(),
        ))
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<DomainEvent, DomainError> {
        self.ensure_present()?;
        if !self.contains_item(&cmd.item_id) {
            return Err(DomainError::not_found(format!("item {}", cmd.item_id)));
        }

        Ok(DomainEvent::item_removed(cmd.container_id.clone(), cmd.item_id.clone()))
    }

    fn handle_remove(&self, cmd: &RemoveContainer) -> Result<DomainEvent, DomainError> {
        self.ensure_present()?;

        Ok(DomainEvent::container_removed(cmd.container_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxtree_events::{CodecRegistry, Event, execute};
    use proptest::prelude::*;

    fn cid() -> ContainerId {
        ContainerId::from("c1")
    }

    fn create(title: &str) -> ContainerCommand {
        ContainerCommand::Create(CreateContainer {
            container_id: cid(),
            title: title.to_string(),
        })
    }

    fn add(item: &str, title: &str) -> ContainerCommand {
        ContainerCommand::AddItem(AddItem {
            container_id: cid(),
            item_id: ItemId::from(item),
            title: title.to_string(),
        })
    }

    fn created() -> Container {
        let mut c = Container::empty(cid());
        execute(&mut c, &create("Groceries")).unwrap();
        c
    }

    #[test]
    fn create_emits_one_event_and_applies_it() {
        let mut c = Container::empty(cid());
        let events = execute(&mut c, &create("Groceries")).unwrap();

        assert_eq!(events, vec![DomainEvent::container_created("c1", "Groceries")]);
        assert_eq!(c.state(), ContainerState::Present);
        assert_eq!(c.title(), "Groceries");
        assert_eq!(c.version(), 1);
    }

    #[test]
    fn handle_does_not_mutate() {
        let c = Container::empty(cid());
        let before = c.clone();
        c.handle(&create("Groceries")).unwrap();
        assert_eq!(c, before);
    }

    #[test]
    fn blank_identifiers_never_reach_an_event() {
        let c = Container::empty(ContainerId::from(" "));
        let create = ContainerCommand::Create(CreateContainer {
            container_id: ContainerId::from(" "),
            title: "Box".to_string(),
        });
        assert!(matches!(c.handle(&create).unwrap_err(), DomainError::InvalidId(_)));

        let c = created();
        assert!(matches!(c.handle(&add("", "Milk")).unwrap_err(), DomainError::InvalidId(_)));
        assert!(c.items().is_empty());
    }

    #[test]
    fn blank_title_is_rejected() {
        let c = Container::empty(cid());
        let err = c.handle(&create("  ")).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn commands_before_create_are_not_found() {
        let c = Container::empty(cid());
        let err = c.handle(&add("i1", "Milk")).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn duplicate_create_and_duplicate_item_conflict() {
        let mut c = created();
        assert!(matches!(c.handle(&create("Again")).unwrap_err(), DomainError::Conflict(_)));

        execute(&mut c, &add("i1", "Milk")).unwrap();
        assert!(matches!(c.handle(&add("i1", "Milk")).unwrap_err(), DomainError::Conflict(_)));
    }

    #[test]
    fn wrong_container_id_is_an_invariant_violation() {
        let c = created();
        let cmd = ContainerCommand::Remove(RemoveContainer {
            container_id: ContainerId::from("other"),
        });
        assert!(matches!(c.handle(&cmd).unwrap_err(), DomainError::InvariantViolation(_)));
    }

    #[test]
    fn removed_container_is_terminal() {
        let mut c = created();
        execute(&mut c, &add("i1", "Milk")).unwrap();
        let events = execute(
            &mut c,
            &ContainerCommand::Remove(RemoveContainer { container_id: cid() }),
        )
        .unwrap();

        assert_eq!(events, vec![DomainEvent::container_removed("c1")]);
        assert_eq!(c.state(), ContainerState::Removed);
        assert!(c.items().is_empty());
        assert!(matches!(c.handle(&add("i2", "Eggs")).unwrap_err(), DomainError::NotFound(_)));
        assert!(matches!(c.handle(&create("Again")).unwrap_err(), DomainError::Conflict(_)));
    }

    #[test]
    fn remove_item_requires_known_item() {
        let mut c = created();
        let remove = ContainerCommand::RemoveItem(RemoveItem {
            container_id: cid(),
            item_id: ItemId::from("i1"),
        });
        assert!(matches!(c.handle(&remove).unwrap_err(), DomainError::NotFound(_)));

        execute(&mut c, &add("i1", "Milk")).unwrap();
        execute(&mut c, &remove).unwrap();
        assert!(c.items().is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: every accepted command yields exactly one event, that
        /// event survives the transport codec unchanged, and the aggregate
        /// version equals the number of accepted commands.
        #[test]
        fn one_event_per_accepted_command(
            ops in prop::collection::vec((0u8..4, 0u8..6), 1..40)
        ) {
            let codecs = CodecRegistry::default();
            let mut c = Container::empty(cid());
            let mut accepted = 0u64;

            for (op, n) in ops {
                let item = ItemId::from(format!("i{n}"));
                let cmd = match op {
                    0 => create("Box"),
                    1 => add(item.as_str(), "Thing"),
                    2 => ContainerCommand::RemoveItem(RemoveItem { container_id: cid(), item_id: item }),
                    _ => ContainerCommand::Rename(RenameContainer { container_id: cid(), title: format!("Box {n}") }),
                };
                if let Ok(events) = execute(&mut c, &cmd) {
                    prop_assert_eq!(events.len(), 1);
                    let payload = codecs.encode(&events[0]).unwrap();
                    prop_assert_eq!(&codecs.decode(events[0].kind(), &payload).unwrap(), &events[0]);
                    accepted += 1;
                }
            }

            prop_assert_eq!(c.version(), accepted);
        }
    }
}
