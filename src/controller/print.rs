//! Line formatting (spec §4.5.10). The only component that writes to the
//! output sink (spec §5 "Shared resources").

use std::io::Write;

use crate::goroutine::StackFrame;

pub fn format_call(depth: u32, goroutine_id: i64, frame: &StackFrame) -> String {
    let bars = "|".repeat(depth.saturating_sub(1) as usize);
    let args = frame
        .parameters
        .iter()
        .filter(|p| !p.is_output)
        .map(render_arg)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}\\ (#{}) {}({})", bars, goroutine_id, frame.function_name, args)
}

pub fn format_return(depth: u32, goroutine_id: i64, frame: &StackFrame) -> String {
    let bars = "|".repeat(depth.saturating_sub(1) as usize);
    let outputs = frame
        .parameters
        .iter()
        .filter(|p| p.is_output)
        .map(render_arg)
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}/ (#{}) {}() ({})", bars, goroutine_id, frame.function_name, outputs)
}

fn render_arg(p: &crate::goroutine::frame::ParameterValue) -> String {
    match &p.name {
        Some(name) => format!("{} = {}", name, p.value.render()),
        None => p.value.render(),
    }
}

pub fn write_line(sink: &mut dyn Write, line: &str) -> std::io::Result<()> {
    writeln!(sink, "{}", line)
}
