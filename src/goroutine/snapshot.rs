//! `GoroutineSnapshot`, produced per trap (spec §3 Data Model).

#[derive(Copy, Clone, Debug)]
pub struct PanicHandler {
    pub pc_at_defer: u64,
    pub used_stack_size_at_defer: u64,
}

#[derive(Clone, Debug)]
pub struct GoroutineSnapshot {
    pub id: i64,
    pub ancestor_ids: Vec<i64>,
    pub used_stack_size: u64,
    pub current_pc: u64,
    pub current_stack_addr: u64,
    pub next_defer_fn_addr: u64,
    pub panicking: bool,
    pub panic_handler: Option<PanicHandler>,
}
