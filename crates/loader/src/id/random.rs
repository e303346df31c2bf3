use uuid::Uuid;

use super::UuidValueGenerator;

/// Random (version 4) identifiers, no shared state
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomUuidGenerator;

impl RandomUuidGenerator {
    pub fn new() -> Self {
        Self
    }
}

impl UuidValueGenerator for RandomUuidGenerator {
    fn generate_uuid(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_version_four() {
        let generator = RandomUuidGenerator::new();
        let a = generator.generate_uuid();
        let b = generator.generate_uuid();
        assert_eq!(a.get_version_num(), 4);
        assert_ne!(a, b);
    }
}
