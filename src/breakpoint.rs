//! The breakpoint registry (component D, spec §4.4). Tracks, per code
//! address, the original byte displaced by the trap opcode and whether
//! the breakpoint is unconditional or conditional on a multiset of
//! goroutine ids. Issues exactly one `write_memory` per physical
//! set/clear of the trap byte — never on a condition-only adjustment
//! (spec invariants P1/P2/P7).

use std::collections::HashMap;

use crate::debug_api::DebugApiClient;
use crate::error::Result;

const TRAP_OPCODE: u8 = 0xCC;

#[derive(Clone, Debug)]
enum Condition {
    Any,
    /// goroutine id -> outstanding occurrence count.
    Goroutines(HashMap<i64, u32>),
}

#[derive(Clone, Debug)]
struct Entry {
    original_byte: u8,
    condition: Condition,
}

#[derive(Default)]
pub struct Registry {
    entries: HashMap<u64, Entry>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn exists(&self, addr: u64) -> bool {
        self.entries.contains_key(&addr)
    }

    /// The byte displaced at `addr` when its breakpoint was installed,
    /// needed to single-step across a trap without losing the entry
    /// (the controller never removes the registry entry for this).
    pub fn original_byte(&self, addr: u64) -> Option<u8> {
        self.entries.get(&addr).map(|e| e.original_byte)
    }

    /// True if `addr` is currently trapped for `goroutine_id` — either
    /// unconditionally, or conditionally with that id present in the
    /// multiset.
    pub fn is_hit(&self, addr: u64, goroutine_id: i64) -> bool {
        match self.entries.get(&addr) {
            None => false,
            Some(Entry { condition: Condition::Any, .. }) => true,
            Some(Entry { condition: Condition::Goroutines(set), .. }) => {
                set.get(&goroutine_id).copied().unwrap_or(0) > 0
            }
        }
    }

    fn install(&mut self, client: &dyn DebugApiClient, addr: u64) -> Result<u8> {
        let original = client.read_memory(addr, 1)?[0];
        client.write_memory(addr, &[TRAP_OPCODE])?;
        Ok(original)
    }

    fn uninstall(&mut self, client: &dyn DebugApiClient, addr: u64, original: u8) -> Result<()> {
        client.write_memory(addr, &[original])
    }

    /// Unconditional; takes precedence. A later `set` on an address
    /// already conditionally trapped upgrades it to unconditional
    /// without touching target memory (spec §4.4).
    pub fn set(&mut self, client: &dyn DebugApiClient, addr: u64) -> Result<()> {
        match self.entries.get_mut(&addr) {
            Some(entry) => {
                entry.condition = Condition::Any;
                Ok(())
            }
            None => {
                let original = self.install(client, addr)?;
                self.entries.insert(addr, Entry { original_byte: original, condition: Condition::Any });
                Ok(())
            }
        }
    }

    /// A no-op if `addr` is already unconditionally set (unconditional
    /// takes precedence, spec §4.4).
    pub fn set_conditional(&mut self, client: &dyn DebugApiClient, addr: u64, goroutine_id: i64) -> Result<()> {
        match self.entries.get_mut(&addr) {
            Some(Entry { condition: Condition::Any, .. }) => Ok(()),
            Some(Entry { condition: Condition::Goroutines(set), .. }) => {
                *set.entry(goroutine_id).or_insert(0) += 1;
                Ok(())
            }
            None => {
                let original = self.install(client, addr)?;
                let mut set = HashMap::new();
                set.insert(goroutine_id, 1);
                self.entries.insert(addr, Entry { original_byte: original, condition: Condition::Goroutines(set) });
                Ok(())
            }
        }
    }

    pub fn clear(&mut self, client: &dyn DebugApiClient, addr: u64) -> Result<()> {
        if let Some(entry) = self.entries.remove(&addr) {
            self.uninstall(client, addr, entry.original_byte)?;
        }
        Ok(())
    }

    /// Removes one occurrence of `goroutine_id` from the conditional
    /// multiset at `addr`; clears the physical breakpoint if that
    /// empties it (spec P7).
    pub fn clear_conditional(&mut self, client: &dyn DebugApiClient, addr: u64, goroutine_id: i64) -> Result<()> {
        let became_empty = match self.entries.get_mut(&addr) {
            Some(Entry { condition: Condition::Goroutines(set), .. }) => {
                if let Some(count) = set.get_mut(&goroutine_id) {
                    if *count > 0 {
                        *count -= 1;
                    }
                    if *count == 0 {
                        set.remove(&goroutine_id);
                    }
                }
                set.is_empty()
            }
            _ => false,
        };
        if became_empty {
            self.clear(client, addr)?;
        }
        Ok(())
    }

    /// Removes every occurrence of `goroutine_id` across all
    /// conditional breakpoints, clearing any that become empty.
    pub fn clear_all_for(&mut self, client: &dyn DebugApiClient, goroutine_id: i64) -> Result<()> {
        let mut to_clear = Vec::new();
        for (addr, entry) in self.entries.iter_mut() {
            if let Condition::Goroutines(set) = &mut entry.condition {
                set.remove(&goroutine_id);
                if set.is_empty() {
                    to_clear.push(*addr);
                }
            }
        }
        for addr in to_clear {
            self.clear(client, addr)?;
        }
        Ok(())
    }

    /// Every byte modified by this registry and its original value —
    /// used by `Process::detach` to restore the target unconditionally
    /// (spec P3), independent of condition bookkeeping.
    pub fn installed_bytes(&self) -> Vec<(u64, u8)> {
        self.entries.iter().map(|(addr, e)| (*addr, e.original_byte)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as GResult;
    use std::cell::RefCell;
    use std::collections::HashMap as Map;

    struct FakeClient {
        memory: RefCell<Map<u64, u8>>,
        writes: RefCell<Vec<(u64, u8)>>,
    }

    impl FakeClient {
        fn new() -> FakeClient {
            let mut memory = Map::new();
            for addr in 0..0x100u64 {
                memory.insert(addr, 0x90);
            }
            FakeClient { memory: RefCell::new(memory), writes: RefCell::new(Vec::new()) }
        }
    }

    impl DebugApiClient for FakeClient {
        fn launch(&mut self, _: &str, _: &[String]) -> GResult<crate::debug_api::ThreadId> {
            unimplemented!()
        }
        fn attach(&mut self, _: libc::pid_t) -> GResult<crate::debug_api::ThreadId> {
            unimplemented!()
        }
        fn detach(&mut self) -> GResult<()> {
            unimplemented!()
        }
        fn read_memory(&self, addr: u64, len: usize) -> GResult<Vec<u8>> {
            let mem = self.memory.borrow();
            Ok((0..len as u64).map(|i| *mem.get(&(addr + i)).unwrap_or(&0)).collect())
        }
        fn write_memory(&self, addr: u64, bytes: &[u8]) -> GResult<()> {
            let mut mem = self.memory.borrow_mut();
            for (i, b) in bytes.iter().enumerate() {
                mem.insert(addr + i as u64, *b);
                self.writes.borrow_mut().push((addr + i as u64, *b));
            }
            Ok(())
        }
        fn read_registers(&self, _: crate::debug_api::ThreadId) -> GResult<crate::registers::Registers> {
            unimplemented!()
        }
        fn write_registers(&self, _: crate::debug_api::ThreadId, _: &crate::registers::Registers) -> GResult<()> {
            unimplemented!()
        }
        fn read_tls(&self, _: crate::debug_api::ThreadId, _: i64) -> GResult<u64> {
            unimplemented!()
        }
        fn continue_and_wait(&mut self) -> GResult<crate::debug_api::Event> {
            unimplemented!()
        }
        fn step_and_wait(&mut self, _: crate::debug_api::ThreadId) -> GResult<crate::debug_api::Event> {
            unimplemented!()
        }
    }

    #[test]
    fn set_then_set_conditional_is_noop_on_memory() {
        let client = FakeClient::new();
        let mut reg = Registry::new();
        reg.set(&client, 0x10).unwrap();
        let writes_before = client.writes.borrow().len();
        reg.set_conditional(&client, 0x10, 7).unwrap();
        assert_eq!(client.writes.borrow().len(), writes_before);
        assert!(reg.is_hit(0x10, 7));
        assert!(reg.is_hit(0x10, 999));
    }

    #[test]
    fn conditional_breakpoint_is_scoped_to_its_goroutine() {
        let client = FakeClient::new();
        let mut reg = Registry::new();
        reg.set_conditional(&client, 0x20, 1).unwrap();
        assert!(reg.is_hit(0x20, 1));
        assert!(!reg.is_hit(0x20, 2));
    }

    #[test]
    fn recursive_hits_require_matching_clears() {
        let client = FakeClient::new();
        let mut reg = Registry::new();
        reg.set_conditional(&client, 0x30, 1).unwrap();
        reg.set_conditional(&client, 0x30, 1).unwrap();
        reg.clear_conditional(&client, 0x30, 1).unwrap();
        assert!(reg.exists(0x30));
        assert!(reg.is_hit(0x30, 1));
        reg.clear_conditional(&client, 0x30, 1).unwrap();
        assert!(!reg.exists(0x30));
    }

    #[test]
    fn clear_restores_original_byte() {
        let client = FakeClient::new();
        let mut reg = Registry::new();
        reg.set(&client, 0x40).unwrap();
        assert_eq!(client.read_memory(0x40, 1).unwrap()[0], 0xCC);
        reg.clear(&client, 0x40).unwrap();
        assert_eq!(client.read_memory(0x40, 1).unwrap()[0], 0x90);
        assert!(!reg.exists(0x40));
    }

    #[test]
    fn clear_all_for_drops_only_that_goroutine() {
        let client = FakeClient::new();
        let mut reg = Registry::new();
        reg.set_conditional(&client, 0x50, 1).unwrap();
        reg.set_conditional(&client, 0x50, 2).unwrap();
        reg.clear_all_for(&client, 1).unwrap();
        assert!(reg.exists(0x50));
        assert!(!reg.is_hit(0x50, 1));
        assert!(reg.is_hit(0x50, 2));
        reg.clear_all_for(&client, 2).unwrap();
        assert!(!reg.exists(0x50));
    }
}
