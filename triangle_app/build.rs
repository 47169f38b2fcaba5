// build.rs
// Compiles the GLSL sources in shaders/ to SPIR-V next to them with glslc

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHADER_STAGES: [&str; 2] = ["vert", "frag"];

fn main() {
    println!("cargo:rerun-if-changed=shaders");
    println!("cargo:rerun-if-env-changed=VULKAN_SDK");
    println!("cargo:rerun-if-env-changed=SKIP_SHADERS");

    if env::var("SKIP_SHADERS").is_ok() {
        println!("cargo:warning=Skipping shader compilation (SKIP_SHADERS set)");
        return;
    }

    let shader_dir = PathBuf::from("shaders");
    let entries = match std::fs::read_dir(&shader_dir) {
        Ok(entries) => entries,
        Err(e) => panic!("No shader directory at {:?}: {}", shader_dir, e),
    };

    let mut stale = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let is_stage = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| SHADER_STAGES.contains(&ext));
        if !is_stage {
            continue;
        }

        // simple_shader.vert -> simple_shader.vert.spv
        let mut out_name = path.file_name().unwrap_or_default().to_os_string();
        out_name.push(".spv");
        let out_file = path.with_file_name(out_name);

        if needs_compile(&path, &out_file) {
            stale.push((path, out_file));
        }
    }

    if stale.is_empty() {
        return;
    }

    // The demo cannot start without these files
    let Some(glslc) = find_glslc() else {
        panic!(
            "glslc not found (install the Vulkan SDK or add glslc to PATH); cannot compile {:?}",
            stale.iter().map(|(source, _)| source).collect::<Vec<_>>()
        );
    };

    for (source, out_file) in stale {
        match Command::new(&glslc).arg(&source).arg("-o").arg(&out_file).status() {
            Ok(status) if status.success() => {}
            Ok(status) => panic!("glslc failed for {:?} with exit code {:?}", source, status.code()),
            Err(e) => panic!("Failed to run glslc for {:?}: {}", source, e),
        }
    }
}

fn find_glslc() -> Option<PathBuf> {
    let exe = if cfg!(target_os = "windows") { "glslc.exe" } else { "glslc" };

    if let Ok(sdk) = env::var("VULKAN_SDK") {
        let bin = if cfg!(target_os = "windows") { "Bin" } else { "bin" };
        let candidate = Path::new(&sdk).join(bin).join(exe);
        if candidate.exists() {
            return Some(candidate);
        }
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(exe))
            .find(|candidate| candidate.exists())
    })
}

fn needs_compile(source: &Path, output: &Path) -> bool {
    let modified = |path: &Path| std::fs::metadata(path).and_then(|meta| meta.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(dst)) => src > dst,
        _ => true,
    }
}
