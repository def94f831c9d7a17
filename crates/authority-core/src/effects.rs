use contracts::{
    ConnectionId, EconomyCharge, Environment, ScheduledEnvironmentEvent, ServerMessage, Vessel,
};

/// Who a message is for. Resolution to sockets happens outside the core.
#[derive(Debug, Clone, PartialEq)]
pub enum Audience {
    Space {
        space_id: String,
        exclude: Option<ConnectionId>,
    },
    Connection(ConnectionId),
    Users {
        space_id: Option<String>,
        user_ids: Vec<String>,
    },
}

/// Side effects requested by a mutation. In-memory state is already updated
/// when these are handed out; they must never block the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send {
        audience: Audience,
        message: ServerMessage,
    },
    PersistVessel {
        vessel: Box<Vessel>,
        force: bool,
    },
    PersistEnvironment {
        space_id: String,
        environment: Box<Environment>,
        force: bool,
    },
    PersistEvent(Box<ScheduledEnvironmentEvent>),
    Charge(EconomyCharge),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Effects {
    items: Vec<Effect>,
}

impl Effects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, effect: Effect) {
        self.items.push(effect);
    }

    pub fn send(&mut self, audience: Audience, message: ServerMessage) {
        self.items.push(Effect::Send { audience, message });
    }

    pub fn to_space(&mut self, space_id: &str, message: ServerMessage) {
        self.send(
            Audience::Space {
                space_id: space_id.to_string(),
                exclude: None,
            },
            message,
        );
    }

    pub fn persist_vessel(&mut self, vessel: &Vessel, force: bool) {
        self.items.push(Effect::PersistVessel {
            vessel: Box::new(vessel.clone()),
            force,
        });
    }

    pub fn charge(&mut self, charge: EconomyCharge) {
        self.items.push(Effect::Charge(charge));
    }

    pub fn extend(&mut self, other: Effects) {
        self.items.extend(other.items);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Effect> {
        self.items.iter()
    }

    pub fn forced_vessel_writes(&self) -> usize {
        self.items
            .iter()
            .filter(|effect| matches!(effect, Effect::PersistVessel { force: true, .. }))
            .count()
    }

    pub fn charges(&self) -> impl Iterator<Item = &EconomyCharge> {
        self.items.iter().filter_map(|effect| match effect {
            Effect::Charge(charge) => Some(charge),
            _ => None,
        })
    }

    pub fn messages(&self) -> impl Iterator<Item = (&Audience, &ServerMessage)> {
        self.items.iter().filter_map(|effect| match effect {
            Effect::Send { audience, message } => Some((audience, message)),
            _ => None,
        })
    }
}

impl IntoIterator for Effects {
    type Item = Effect;
    type IntoIter = std::vec::IntoIter<Effect>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl From<Vec<Effect>> for Effects {
    fn from(items: Vec<Effect>) -> Self {
        Self { items }
    }
}
