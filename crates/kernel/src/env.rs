//! The environment table.

use mmu::{PageDirectory, VirtualAddress};
use ulib::{ChildEntry, EnvId, EnvStatus, Trapframe, UpcallEntry};

/// Bits of an environment id that select its table slot.
pub const ENV_SLOT_BITS: u32 = 10;

/// Upper bound on the size of the environment table.
pub const MAX_ENV_SLOTS: usize = 1 << ENV_SLOT_BITS;

/// A live environment.
pub struct Env {
    pub id: EnvId,
    /// Id of the creating environment, or [`EnvId::SELF`] for one spawned by the kernel.
    pub parent: EnvId,
    pub status: EnvStatus,
    pub dir: PageDirectory,
    /// Saved registers.
    pub tf: Trapframe,
    pub upcall: Option<UpcallEntry>,
    /// Code to run when next scheduled.
    pub entry: Option<ChildEntry>,
    /// Number of page faults delivered to the upcall.
    pub faults: usize,
    /// Lowest exception stack record in use while upcalls are running.
    pub xstack: Option<VirtualAddress>,
}

impl Env {
    /// Returns true unless the environment was destroyed.
    pub fn is_alive(&self) -> bool {
        !matches!(self.status, EnvStatus::Free | EnvStatus::Dying)
    }
}

struct Slot {
    generation: u32,
    env: Option<Env>,
}

/// Fixed-size table of environments indexed by id slot.
pub struct EnvTable {
    slots: Vec<Slot>,
}

impl EnvTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity.min(MAX_ENV_SLOTS))
                .map(|_| Slot {
                    generation: 0,
                    env: None,
                })
                .collect(),
        }
    }

    /// Claims a free slot for a new, not-runnable environment.
    ///
    /// Ids combine a per-slot generation with the slot number, so a stale id never names
    /// a later occupant of the same slot.
    pub fn alloc(&mut self, parent: EnvId, tf: Trapframe) -> Option<EnvId> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.env.is_none())?;

        slot.generation = (slot.generation + 1) & (u32::MAX >> ENV_SLOT_BITS);
        if slot.generation == 0 {
            slot.generation = 1;
        }
        let id = EnvId::new((slot.generation << ENV_SLOT_BITS) | index as u32);
        slot.env = Some(Env {
            id,
            parent,
            status: EnvStatus::NotRunnable,
            dir: PageDirectory::new(),
            tf,
            upcall: None,
            entry: None,
            faults: 0,
            xstack: None,
        });
        Some(id)
    }

    /// Looks up an environment by its exact id, including destroyed ones that have not
    /// been reclaimed yet.
    pub fn get(&self, id: EnvId) -> Option<&Env> {
        self.slots
            .get(Self::slot_index(id))
            .and_then(|slot| slot.env.as_ref())
            .filter(|env| env.id == id)
    }

    pub fn get_mut(&mut self, id: EnvId) -> Option<&mut Env> {
        self.slots
            .get_mut(Self::slot_index(id))
            .and_then(|slot| slot.env.as_mut())
            .filter(|env| env.id == id)
    }

    /// Releases the slot of `id`. Its page directory must already be empty.
    pub fn free(&mut self, id: EnvId) -> Option<Env> {
        let slot = self.slots.get_mut(Self::slot_index(id))?;
        if slot.env.as_ref().is_some_and(|env| env.id == id) {
            slot.env.take()
        } else {
            None
        }
    }

    /// Iterates over occupied slots in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter().filter_map(|slot| slot.env.as_ref())
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slot index of `id`.
    pub fn slot_index(id: EnvId) -> usize {
        (id.as_u32() as usize) & (MAX_ENV_SLOTS - 1)
    }
}
