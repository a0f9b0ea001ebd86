// build.rs
// Compiles the GLSL stages under resources/shaders to SPIR-V

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const STAGES: [&str; 3] = ["vert", "frag", "geom"];

/// Compile every shader stage in `shader_dir` next to its source as `<file>.spv`
fn compile_shaders(shader_dir: &Path, glslc: &Path) -> usize {
    let shader_files = match std::fs::read_dir(shader_dir) {
        Ok(files) => files,
        Err(_) => {
            eprintln!("info: No shader directory found at: {:?}", shader_dir);
            return 0;
        }
    };

    let mut compiled_count = 0;
    for entry in shader_files {
        let path = match entry {
            Ok(e) => e.path(),
            Err(e) => {
                eprintln!("warning: Error reading shader directory entry: {}", e);
                continue;
            }
        };

        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| STAGES.contains(&ext));
        if !is_stage {
            continue;
        }
        println!("cargo:rerun-if-changed={}", path.display());

        // lighting.frag -> lighting.frag.spv
        let mut out_name = path.file_name().unwrap_or_default().to_os_string();
        out_name.push(".spv");
        let out_file = path.with_file_name(out_name);

        let needs_compile = match (std::fs::metadata(&path), std::fs::metadata(&out_file)) {
            (Ok(src), Ok(dst)) => match (src.modified(), dst.modified()) {
                (Ok(src_time), Ok(dst_time)) => src_time > dst_time,
                _ => true,
            },
            _ => true,
        };
        if !needs_compile {
            eprintln!("info: Shader {:?} is up to date", path.file_name().unwrap_or_default());
            continue;
        }

        let status = Command::new(glslc).arg("--target-env=vulkan1.1").arg(&path).arg("-o").arg(&out_file).status();
        match status {
            Ok(s) if s.success() => {
                eprintln!("info: Compiled {:?} -> {:?}", path, out_file);
                compiled_count += 1;
            }
            Ok(s) => {
                eprintln!("error: glslc failed for {:?} with exit code: {}", path, s.code().unwrap_or(-1));
                panic!("Shader compilation failed");
            }
            Err(e) => {
                eprintln!("error: Failed to run glslc for {:?}: {}", path, e);
                panic!("Failed to execute shader compiler");
            }
        }
    }
    compiled_count
}

fn main() {
    println!("cargo:rerun-if-changed=resources/shaders");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    // Headless builds and tests don't need SPIR-V, so a missing SDK only warns
    let vulkan_sdk = match env::var("VULKAN_SDK") {
        Ok(sdk) => PathBuf::from(sdk),
        Err(_) => {
            eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
            return;
        }
    };

    let glslc = if cfg!(target_os = "windows") {
        vulkan_sdk.join("Bin").join("glslc.exe")
    } else {
        vulkan_sdk.join("bin").join("glslc")
    };
    if !glslc.exists() {
        eprintln!("error: glslc not found at: {:?}", glslc);
        panic!("Shader compiler not found");
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string()));
    let compiled_count = compile_shaders(&manifest_dir.join("resources").join("shaders"), &glslc);
    if compiled_count > 0 {
        eprintln!("info: Successfully compiled {} shader(s)", compiled_count);
    } else {
        eprintln!("info: All shaders are up to date");
    }
}
