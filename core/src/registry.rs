// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Registry of opaque handles.
//!
//! Handles index a generational arena: releasing a slot bumps its
//! generation, so any copy of the old handle is rejected instead of
//! reaching whatever object reuses the slot. The registry does not lock;
//! sharing one between threads requires external synchronization.

use std::fmt::Display;

use tracing::error;

use crate::error::{Error, Result, Status};

const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// The kind of object a handle refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Database,
    Connection,
    Statement,
    Result,
    Appender,
}

impl Role {
    fn code(&self) -> u8 {
        match self {
            Self::Database => 1,
            Self::Connection => 2,
            Self::Statement => 3,
            Self::Result => 4,
            Self::Appender => 5,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Database),
            2 => Some(Self::Connection),
            3 => Some(Self::Statement),
            4 => Some(Self::Result),
            5 => Some(Self::Appender),
            _ => None,
        }
    }
}

/// An opaque token for an object owned by a [Registry].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
    role: Role,
}

impl Handle {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Pack the handle into an integer, for callers on the other side of
    /// a language boundary.
    pub fn token(&self) -> u64 {
        (self.role.code() as u64) << 56 | (self.generation as u64) << 32 | self.index as u64
    }

    pub fn from_token(token: u64) -> Result<Self> {
        let role = Role::from_code((token >> 56) as u8).ok_or_else(|| {
            Error::with_message_and_status(format!("Malformed handle token {token:#x}"), Status::TypeMismatch)
        })?;
        Ok(Self {
            index: token as u32,
            generation: (token >> 32) as u32 & GENERATION_MASK,
            role,
        })
    }
}

impl Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}#{}.{}", self.role, self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    entry: Option<(Role, T)>,
}

/// Generational arena mapping handles to owned objects.
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, role: Role, value: T) -> Handle {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].entry = Some((role, value));
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some((role, value)),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Handle {
            index,
            generation: self.slots[index as usize].generation,
            role,
        }
    }

    fn check_role(handle: Handle, expected: Role) -> Result<()> {
        if handle.role != expected {
            return Err(Error::with_message_and_status(
                format!("Handle {handle} used where a {expected:?} handle is required"),
                Status::TypeMismatch,
            ));
        }
        Ok(())
    }

    fn live_slot(&self, handle: Handle) -> Option<&Slot<T>> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.entry.is_some())
    }

    fn use_after_release(handle: Handle) -> Error {
        error!(%handle, "handle used after release");
        Error::with_message_and_status(
            format!("Handle {handle} was already released"),
            Status::UseAfterRelease,
        )
    }

    /// Whether the handle still refers to a live object.
    pub fn contains(&self, handle: Handle) -> bool {
        self.live_slot(handle).is_some()
    }

    pub fn get(&self, handle: Handle, expected: Role) -> Result<&T> {
        Self::check_role(handle, expected)?;
        match self.live_slot(handle).and_then(|slot| slot.entry.as_ref()) {
            Some((role, _)) if *role != expected => Err(Error::with_message_and_status(
                format!("Handle {handle} refers to a {role:?}"),
                Status::TypeMismatch,
            )),
            Some((_, value)) => Ok(value),
            None => Err(Self::use_after_release(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: Handle, expected: Role) -> Result<&mut T> {
        self.get(handle, expected)?;
        match self.slots[handle.index as usize].entry.as_mut() {
            Some((_, value)) => Ok(value),
            None => Err(Self::use_after_release(handle)),
        }
    }

    /// Take the object out and invalidate every copy of the handle.
    pub fn remove(&mut self, handle: Handle, expected: Role) -> Result<T> {
        Self::check_role(handle, expected)?;
        if self.live_slot(handle).is_none() {
            error!(%handle, "handle released twice");
            return Err(Error::with_message_and_status(
                format!("Handle {handle} was released twice"),
                Status::DoubleRelease,
            ));
        }
        self.get(handle, expected)?;
        let slot = &mut self.slots[handle.index as usize];
        let (_, value) = slot
            .entry
            .take()
            .ok_or_else(|| Self::use_after_release(handle))?;
        slot.generation = (slot.generation + 1) & GENERATION_MASK;
        self.free.push(handle.index);
        Ok(value)
    }

    /// Handles of every live object, in slot order.
    pub fn handles(&self) -> Vec<Handle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.entry.as_ref().map(|(role, _)| Handle {
                    index: index as u32,
                    generation: slot.generation,
                    role: *role,
                })
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.entry.as_ref().map(|(role, value)| {
                (
                    Handle {
                        index: index as u32,
                        generation: slot.generation,
                        role: *role,
                    },
                    value,
                )
            })
        })
    }
}
