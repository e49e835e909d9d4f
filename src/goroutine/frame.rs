//! `StackFrame`: the function, its return address, and its decoded
//! parameters, built from an SP that is known to point at a return
//! address (spec §4.3 "Requires that the caller has guaranteed `sp`
//! points to the return address, which is true only at the first or
//! last instruction of a function").

use crate::binary::types::{Function, FunctionId};
use crate::binary::Binary;
use crate::debug_api::DebugApiClient;
use crate::error::Result;

use super::value::{self, Value};

#[derive(Clone, Debug)]
pub struct ParameterValue {
    pub name: Option<String>,
    pub value: Value,
    pub is_output: bool,
}

#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: FunctionId,
    pub function_name: String,
    pub return_address: u64,
    pub parameters: Vec<ParameterValue>,
}

/// Reads the return address at `sp` and every located parameter at
/// `sp + 8 + offset` (spec §4.3). A parameter that failed to decode
/// prints as `-` rather than failing the whole frame (spec §7).
pub fn build(
    client: &dyn DebugApiClient,
    binary: &Binary,
    function_id: FunctionId,
    function: &Function,
    sp: u64,
    parse_level: u32,
) -> Result<StackFrame> {
    let ret_bytes = client.read_memory(sp, 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&ret_bytes);
    let return_address = u64::from_le_bytes(buf);

    let mut parameters = Vec::with_capacity(function.parameters.len());
    for p in &function.parameters {
        if !p.exists {
            parameters.push(ParameterValue {
                name: p.name.clone(),
                value: Value::Abbreviated,
                is_output: p.is_output,
            });
            continue;
        }
        let addr = sp + 8 + p.stack_offset;
        let value = value::decode(client, binary, addr, &p.ty, parse_level).unwrap_or(Value::Abbreviated);
        parameters.push(ParameterValue { name: p.name.clone(), value, is_output: p.is_output });
    }

    Ok(StackFrame {
        function: function_id,
        function_name: function.name.clone(),
        return_address,
        parameters,
    })
}
