use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use proc_macro2::TokenStream;
use quote::format_ident;
use quote::quote;

mod build_serde;
// Structures imported from build_serde.rs
use build_serde::{Block, Register, RegisterMap};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=build_serde.rs");
    println!("cargo:rerun-if-changed=data/wcn_regs.yaml");

    // Read and parse wcn_regs.yaml
    let map_path = Path::new("data").join("wcn_regs.yaml");
    let map_content = fs::read_to_string(&map_path)
        .map_err(|e| format!("Failed to read wcn_regs.yaml: {}", e))?;

    let map: RegisterMap = serde_yaml::from_str(&map_content)
        .map_err(|e| format!("Failed to parse wcn_regs.yaml: {}", e))?;

    validate(&map)?;

    // Get output path from env
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let dest_path = out_dir.join("_generated.rs");

    let mut token_stream = TokenStream::new();

    // Generate the BlockKind enum
    token_stream.extend(generate_block_kind(&map.blocks));

    // Generate per-block register/field constants
    token_stream.extend(generate_map_mod(&map.blocks)?);

    let mut file = File::create(&dest_path)?;
    write!(file, "{}", token_stream)?;
    rustfmt(&dest_path);

    Ok(())
}

/// Reject maps that would generate overlapping or out-of-range fields.
fn validate(map: &RegisterMap) -> Result<(), String> {
    let mut block_names = BTreeSet::new();
    for block in &map.blocks {
        if !block_names.insert(block.name.as_str()) {
            return Err(format!("duplicate block `{}`", block.name));
        }

        let mut reg_names = BTreeSet::new();
        for reg in &block.registers {
            if !reg_names.insert(reg.name.as_str()) {
                return Err(format!("duplicate register `{}.{}`", block.name, reg.name));
            }
            if reg.offset % 4 != 0 || reg.offset >= 0x1000 {
                return Err(format!(
                    "register `{}.{}` has invalid offset 0x{:x}",
                    block.name, reg.name, reg.offset
                ));
            }
            validate_fields(block, reg)?;
        }
    }
    Ok(())
}

fn validate_fields(block: &Block, reg: &Register) -> Result<(), String> {
    let mut used = 0u64;
    for field in &reg.fields {
        let end = field.bit_offset as u32 + field.bit_size as u32;
        if field.bit_size == 0 || end > 32 {
            return Err(format!(
                "field `{}.{}.{}` does not fit in 32 bits",
                block.name, reg.name, field.name
            ));
        }
        let mask = ((1u64 << field.bit_size) - 1) << field.bit_offset;
        if used & mask != 0 {
            return Err(format!(
                "field `{}.{}.{}` overlaps another field",
                block.name, reg.name, field.name
            ));
        }
        used |= mask;
    }
    Ok(())
}

fn generate_block_kind(blocks: &[Block]) -> TokenStream {
    let variants: Vec<_> = blocks
        .iter()
        .map(|b| format_ident!("{}", to_pascal_case(&b.name)))
        .collect();
    let docs: Vec<String> = blocks
        .iter()
        .map(|b| b.description.clone().unwrap_or_else(|| b.display.clone()))
        .collect();
    let displays: Vec<&str> = blocks.iter().map(|b| b.display.as_str()).collect();
    let aliases: Vec<bool> = blocks.iter().map(|b| b.set_clear_alias).collect();
    let count = blocks.len();

    quote! {
        /// Hardware register groups reachable from the AP.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "defmt", derive(defmt::Format))]
        pub enum BlockKind {
            #(
                #[doc = #docs]
                #variants,
            )*
        }

        impl BlockKind {
            /// Every block, in register-map order.
            pub const ALL: [BlockKind; #count] = [#(BlockKind::#variants,)*];

            /// Name of the block as used in hardware documentation and logs.
            pub const fn name(self) -> &'static str {
                match self {
                    #(BlockKind::#variants => #displays,)*
                }
            }

            /// Whether the block decodes the set (+0x1000) / clear (+0x2000) aliases.
            pub const fn has_set_clear_alias(self) -> bool {
                match self {
                    #(BlockKind::#variants => #aliases,)*
                }
            }
        }
    }
}

fn generate_map_mod(blocks: &[Block]) -> Result<TokenStream, String> {
    let mut blocks_tokens = TokenStream::new();

    for block in blocks {
        let block_mod = format_ident!("{}", block.name);
        let variant = format_ident!("{}", to_pascal_case(&block.name));
        let block_doc = format!("`{}` registers.", block.display);

        let mut regs_tokens = TokenStream::new();
        for reg in &block.registers {
            let reg_mod = format_ident!("{}", reg.name);
            let offset: TokenStream = format!("0x{:04x}", reg.offset)
                .parse()
                .map_err(|e| format!("bad offset literal for `{}`: {:?}", reg.name, e))?;
            let reg_doc = reg
                .description
                .clone()
                .unwrap_or_else(|| format!("`{}` at offset 0x{:04x}.", reg.name, reg.offset));

            let mut fields_tokens = TokenStream::new();
            for field in &reg.fields {
                let name = format_ident!("{}", field.name.to_ascii_uppercase());
                let bit_offset = field.bit_offset;
                let bit_size = field.bit_size;
                let doc = field.description.clone().unwrap_or_else(|| {
                    if bit_size == 1 {
                        format!("Bit {}.", bit_offset)
                    } else {
                        format!("Bits [{}:{}].", bit_offset + bit_size - 1, bit_offset)
                    }
                });
                fields_tokens.extend(quote! {
                    #[doc = #doc]
                    pub const #name: Field = Field::new(#bit_offset, #bit_size);
                });
            }

            regs_tokens.extend(quote! {
                #[doc = #reg_doc]
                pub mod #reg_mod {
                    #[allow(unused_imports)]
                    use crate::regs::Field;

                    /// Byte offset from the block base.
                    pub const OFFSET: u32 = #offset;

                    #fields_tokens
                }
            });
        }

        blocks_tokens.extend(quote! {
            #[doc = #block_doc]
            pub mod #block_mod {
                /// Block these registers live in.
                pub const BLOCK: crate::regs::BlockKind = crate::regs::BlockKind::#variant;

                #regs_tokens
            }
        });
    }

    Ok(quote! {
        /// Register offsets and bit fields, generated from `data/wcn_regs.yaml`.
        pub mod map {
            #blocks_tokens
        }
    })
}

/// Converts a string like "foo_bar" or "foo" to "FooBar" or "Foo".
fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<String>()
}

/// rustfmt a given path.
/// Failures are logged to stderr and ignored.
fn rustfmt(path: impl AsRef<Path>) {
    let path = path.as_ref();
    match Command::new("rustfmt").args([path]).output() {
        Err(e) => {
            eprintln!("failed to exec rustfmt {:?}: {:?}", path, e);
        }
        Ok(out) => {
            if !out.status.success() {
                eprintln!("rustfmt {:?} failed:", path);
                eprintln!("=== STDOUT:");
                let _ = std::io::stderr().write_all(&out.stdout);
                eprintln!("=== STDERR:");
                let _ = std::io::stderr().write_all(&out.stderr);
            }
        }
    }
}
