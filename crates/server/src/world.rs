use std::collections::HashMap;

use flotilla::{ClientRequest, Coordinate, DummyObject, GameObjects};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    #[error("dummy {id} already belongs to {owner}")]
    DummyTaken { id: String, owner: String },
    #[error("no dummy {0}")]
    UnknownDummy(String),
    #[error("dummy {id} is not owned by sender")]
    NotOwner { id: String },
    #[error("invalid fps {0}")]
    InvalidFps(f64),
}

/// Side effect of a request that the connection itself has to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Nothing,
    SetFps(f64),
}

#[derive(Debug, Clone)]
struct Dummy {
    owner: String,
    object: DummyObject,
}

/// Authoritative state: every dummy and who may steer it.
#[derive(Debug, Default)]
pub struct World {
    dummies: HashMap<String, Dummy>,
    tick: u64,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn dummy_count(&self) -> usize {
        self.dummies.len()
    }

    pub fn apply(&mut self, user: &str, request: &ClientRequest) -> Result<Applied, RequestError> {
        match request {
            ClientRequest::SetClientFps(fps) => {
                if fps.is_finite() && *fps > 0.0 {
                    Ok(Applied::SetFps(*fps))
                } else {
                    Err(RequestError::InvalidFps(*fps))
                }
            }
            ClientRequest::SpawnDummy(id) => {
                self.spawn(user, id)?;
                Ok(Applied::Nothing)
            }
            ClientRequest::DummySetVelocity { id, position } => {
                self.set_velocity(user, id, *position)?;
                Ok(Applied::Nothing)
            }
            ClientRequest::Connect(target) => {
                log::debug!("{} asked to connect to {}", user, target);
                Ok(Applied::Nothing)
            }
        }
    }

    /// Spawning an id the user already owns is a no-op.
    pub fn spawn(&mut self, user: &str, id: &str) -> Result<(), RequestError> {
        if let Some(existing) = self.dummies.get(id) {
            if existing.owner == user {
                return Ok(());
            }
            return Err(RequestError::DummyTaken {
                id: id.to_string(),
                owner: existing.owner.clone(),
            });
        }

        log::info!("{} spawned dummy {}", user, id);
        self.dummies.insert(
            id.to_string(),
            Dummy {
                owner: user.to_string(),
                object: DummyObject {
                    id: id.to_string(),
                    position: Coordinate::default(),
                    velocity: Coordinate::default(),
                },
            },
        );
        Ok(())
    }

    pub fn set_velocity(
        &mut self,
        user: &str,
        id: &str,
        velocity: Coordinate,
    ) -> Result<(), RequestError> {
        let dummy = self
            .dummies
            .get_mut(id)
            .ok_or_else(|| RequestError::UnknownDummy(id.to_string()))?;
        if dummy.owner != user {
            return Err(RequestError::NotOwner { id: id.to_string() });
        }
        dummy.object.velocity = velocity;
        Ok(())
    }

    pub fn step(&mut self, dt: f64) {
        for dummy in self.dummies.values_mut() {
            let object = &mut dummy.object;
            object.position.x += object.velocity.x * dt;
            object.position.y += object.velocity.y * dt;
            object.position.z += object.velocity.z * dt;
        }
        self.tick += 1;
    }

    pub fn snapshot(&self) -> GameObjects {
        GameObjects {
            dummies: self
                .dummies
                .iter()
                .map(|(id, dummy)| (id.clone(), dummy.object.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_then_steer_moves_dummy() {
        let mut world = World::new();
        world.spawn("alice", "x").unwrap();
        world
            .set_velocity("alice", "x", Coordinate::new(2.0, -1.0, 0.0))
            .unwrap();

        world.step(0.5);
        world.step(0.5);

        let snapshot = world.snapshot();
        let dummy = &snapshot.dummies["x"];
        assert_eq!(dummy.position, Coordinate::new(2.0, -1.0, 0.0));
        assert_eq!(dummy.velocity, Coordinate::new(2.0, -1.0, 0.0));
        assert_eq!(world.tick(), 2);
    }

    #[test]
    fn test_respawn_by_owner_is_noop() {
        let mut world = World::new();
        world.spawn("alice", "x").unwrap();
        world.set_velocity("alice", "x", Coordinate::new(1.0, 0.0, 0.0)).unwrap();
        world.step(1.0);

        world.spawn("alice", "x").unwrap();
        assert_eq!(world.dummy_count(), 1);
        assert_eq!(world.snapshot().dummies["x"].position.x, 1.0);
    }

    #[test]
    fn test_only_owner_may_steer() {
        let mut world = World::new();
        world.spawn("alice", "x").unwrap();

        assert_eq!(
            world.spawn("bob", "x"),
            Err(RequestError::DummyTaken {
                id: "x".into(),
                owner: "alice".into()
            })
        );
        assert_eq!(
            world.set_velocity("bob", "x", Coordinate::default()),
            Err(RequestError::NotOwner { id: "x".into() })
        );
        assert_eq!(
            world.set_velocity("bob", "y", Coordinate::default()),
            Err(RequestError::UnknownDummy("y".into()))
        );
    }

    #[test]
    fn test_apply_reports_fps_changes() {
        let mut world = World::new();
        assert_eq!(
            world.apply("alice", &ClientRequest::SetClientFps(30.0)),
            Ok(Applied::SetFps(30.0))
        );
        assert_eq!(
            world.apply("alice", &ClientRequest::SetClientFps(0.0)),
            Err(RequestError::InvalidFps(0.0))
        );
        assert_eq!(
            world.apply("alice", &ClientRequest::SpawnDummy("d".into())),
            Ok(Applied::Nothing)
        );
        assert_eq!(world.dummy_count(), 1);
    }
}
