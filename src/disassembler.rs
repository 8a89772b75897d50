use crate::script::Script;
use crate::script_compiler::bytecode::{decode_at, Instr};
use crate::script_compiler::symbols::SymbolTable;
use std::fmt::Write;

/// Bytecode listing of a compiled script
pub struct Disassembler<'a> {
    code: &'a [u8],
    symbols: &'a SymbolTable,
    /// Exported labels by position
    labels: Vec<(usize, &'a str)>,
}

impl<'a> Disassembler<'a> {
    pub fn new(script: &'a Script, symbols: &'a SymbolTable) -> Self {
        let mut labels: Vec<(usize, &'a str)> = script.labels().map(|(name, pos)| (pos, name)).collect();
        labels.sort();
        Disassembler {
            code: script.code(),
            symbols,
            labels,
        }
    }

    fn symbol_name(&self, symbol: u32) -> String {
        if self.symbols.contains(symbol) {
            self.symbols.name(symbol).to_string()
        } else {
            format!("<symbol {}>", symbol)
        }
    }

    /// Mnemonic and operand of one instruction
    fn format_instr(&self, instr: &Instr) -> String {
        match instr {
            Instr::Int(value) => format!("INT       {}", value),
            Instr::Pos(pos) => format!("POS       {:#06x}{}", pos, self.label_suffix(*pos)),
            Instr::Name(symbol) => format!("NAME      {}", self.symbol_name(*symbol)),
            Instr::Str(text) => format!("STR       {:?}", text),
            Instr::LandJump(pos) => format!("LAND_JUMP {:#06x}", pos),
            Instr::LorJump(pos) => format!("LOR_JUMP  {:#06x}", pos),
            Instr::Op(op) => op.mnemonic().to_string(),
        }
    }

    fn label_suffix(&self, pos: usize) -> String {
        self.labels
            .iter()
            .find(|(at, _)| *at == pos)
            .map(|(_, name)| format!(" ({})", name))
            .unwrap_or_default()
    }

    /// Disassemble `[start, end)`. Stops at the first malformed instruction.
    pub fn disassemble_range(&self, start: usize, end: usize) -> Result<String, String> {
        let mut output = String::new();
        let end = end.min(self.code.len());
        let mut pc = start;
        while pc < end {
            for (_, name) in self.labels.iter().filter(|(at, _)| *at == pc) {
                let _ = writeln!(output, "{}:", name);
            }
            let (instr, next) = decode_at(self.code, pc).map_err(|e| e.to_string())?;
            let bytes: Vec<String> = self.code[pc..next.min(pc + 6)]
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect();
            let mut hex = bytes.join(" ");
            if next - pc > 6 {
                hex.push_str(" ..");
            }
            let _ = writeln!(output, "{:#06x}: {:<20} {}", pc, hex, self.format_instr(&instr));
            pc = next;
        }
        Ok(output)
    }

    pub fn disassemble_all(&self) -> Result<String, String> {
        self.disassemble_range(0, self.code.len())
    }
}

/// Full listing with a header line; decoding errors are reported inline
pub fn disassemble(script: &Script, symbols: &SymbolTable) -> String {
    let disassembler = Disassembler::new(script, symbols);
    let mut output = format!("; script '{}', {} bytes\n", script.name, script.len());
    match disassembler.disassemble_all() {
        Ok(listing) => output.push_str(&listing),
        Err(e) => {
            let _ = writeln!(output, "; error: {}", e);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptConfig;
    use crate::engine::ScriptEngine;
    use test_log::test;

    #[test]
    fn test_listing_names_labels_and_symbols() {
        let mut engine = ScriptEngine::new(ScriptConfig::default());
        let script = engine
            .compile("Start:\n$count = 2 + 3;\nend;\n", "listing", 1)
            .unwrap();
        let listing = engine.disassemble(&script);
        assert!(listing.starts_with("; script 'listing'"));
        assert!(listing.contains("start:"));
        assert!(listing.contains("NAME      set"));
        assert!(listing.contains("NAME      $count"));
        assert!(listing.contains("INT       2"));
        assert!(listing.contains("ADD"));
        assert!(listing.contains("FUNC"));
    }

    #[test]
    fn test_truncated_code_is_reported() {
        let symbols = SymbolTable::new();
        let script = Script::new("broken", vec![0x06, 0x01], Default::default());
        let listing = disassemble(&script, &symbols);
        assert!(listing.contains("; error:"));
    }
}
