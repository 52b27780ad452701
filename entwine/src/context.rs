use crate::entity::EntityType;

/// The entity types on the path from the root of the join tree being built
/// down to the node currently being wired.
#[derive(Debug, Default)]
pub struct BuilderContext {
    stack: Vec<EntityType>,
}

impl BuilderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entity_type: EntityType) {
        self.stack.push(entity_type);
    }

    pub fn pop(&mut self) -> Option<EntityType> {
        self.stack.pop()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether joining `target` under the current node would close a cycle.
    pub fn closes_cycle(&self, target: &EntityType) -> bool {
        self.stack.contains(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct A;
    struct B;
    struct C;

    #[test]
    fn cycle_detection_follows_the_stack() {
        let mut context = BuilderContext::new();
        context.push(EntityType::of::<A>());
        context.push(EntityType::of::<B>());

        assert!(context.closes_cycle(&EntityType::of::<A>()));
        assert!(context.closes_cycle(&EntityType::of::<B>()));
        assert!(!context.closes_cycle(&EntityType::of::<C>()));

        assert_eq!(context.pop(), Some(EntityType::of::<B>()));
        assert!(!context.closes_cycle(&EntityType::of::<B>()));
        assert_eq!(context.depth(), 1);
    }
}
