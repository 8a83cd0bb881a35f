// build.rs
// Compiles GLSL shaders under resources/shaders into SPIR-V in target/shaders

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_EXTENSIONS: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed=../../resources/shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        eprintln!("info: Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let Ok(vulkan_sdk) = env::var("VULKAN_SDK") else {
        eprintln!("warning: VULKAN_SDK not set, shader compilation skipped");
        return;
    };

    let glslc = if cfg!(target_os = "windows") {
        PathBuf::from(&vulkan_sdk).join("Bin").join("glslc.exe")
    } else {
        PathBuf::from(&vulkan_sdk).join("bin").join("glslc")
    };

    if !glslc.exists() {
        eprintln!("warning: glslc not found at {}, shader compilation skipped", glslc.display());
        return;
    }

    let shader_dir = PathBuf::from("../../resources/shaders");
    let target_dir = PathBuf::from("../../target/shaders");

    if let Err(e) = std::fs::create_dir_all(&target_dir) {
        eprintln!("warning: Failed to create {}: {}", target_dir.display(), e);
        return;
    }

    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(_) => {
            eprintln!("info: No shader directory found at {}", shader_dir.display());
            return;
        }
    };

    let mut compiled_count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_shader = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| SHADER_EXTENSIONS.contains(&ext));
        if !is_shader {
            continue;
        }

        // triangle.vert -> triangle.vert.spv, so stages never collide
        let Some(file_name) = path.file_name() else { continue };
        let out_file = target_dir.join(format!("{}.spv", file_name.to_string_lossy()));

        if !needs_compile(&path, &out_file) {
            continue;
        }

        match Command::new(&glslc).arg(&path).arg("-o").arg(&out_file).status() {
            Ok(status) if status.success() => {
                eprintln!("info: Compiled {} -> {}", path.display(), out_file.display());
                compiled_count += 1;
            }
            Ok(status) => {
                panic!("glslc failed for {} with exit code {}", path.display(), status.code().unwrap_or(-1));
            }
            Err(e) => {
                panic!("Failed to run glslc for {}: {}", path.display(), e);
            }
        }
    }

    eprintln!("info: {} shader(s) compiled", compiled_count);
}

fn needs_compile(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|m| m.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => src > dst,
        _ => true,
    }
}
