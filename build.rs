use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

fn main() {
    let Ok(out_dir) = env::var("OUT_DIR") else {
        println!("cargo:warning=OUT_DIR is not set, skipping shader compilation");
        return;
    };

    let input_path = PathBuf::from("assets/shaders/");
    println!("cargo:rerun-if-changed={}", input_path.to_string_lossy());
    let paths = match fs::read_dir(&input_path) {
        Ok(paths) => paths,
        Err(err) => {
            println!(
                "cargo:warning=Could not read {}: {err}",
                input_path.to_string_lossy()
            );
            return;
        }
    };

    compile_shaders(paths, PathBuf::new(), Path::new(&out_dir));
}

fn compile_shaders(paths: fs::ReadDir, parent_path: PathBuf, out_dir: &Path) {
    for entry in paths {
        let entry = match entry {
            Ok(path) => path,
            Err(_) => continue,
        };
        let shader_file_name = entry.file_name();
        let shader_path = entry.path();
        if shader_path.is_dir() {
            let mut child_path = parent_path.clone();
            child_path.push(shader_file_name);
            if let Ok(children) = fs::read_dir(&shader_path) {
                compile_shaders(children, child_path, out_dir);
            }
            continue;
        }
        // Included headers are not compiled on their own
        if !shader_path.is_file() || shader_path.extension().is_some_and(|ext| ext == "glsl") {
            continue;
        }

        let mut input_path = PathBuf::new();
        input_path.push("assets");
        input_path.push("shaders");
        input_path.push(&parent_path);
        input_path.push(&shader_file_name);

        // glslc can't automatically create directories, so we're just going to pick a flat structure
        let mut output_file_name = shader_file_name.clone();
        output_file_name.push(".spv");
        let output_path = out_dir.join(&output_file_name);

        let shader_file_name = shader_file_name.to_string_lossy();
        // Ray tracing stages need SPIR-V 1.4
        let shader_compile_result = Command::new("glslc")
            .arg("--target-env=vulkan1.2")
            .arg("--target-spv=spv1.4")
            .arg(&input_path)
            .arg("-o")
            .arg(&output_path)
            .status();

        match shader_compile_result {
            Ok(status) if status.success() => {}
            Ok(status) => {
                println!("cargo:warning=Shader compilation for {shader_file_name} failed: {status}");
            }
            Err(err) => {
                println!("cargo:warning=Could not run glslc for {shader_file_name}: {err}");
                return;
            }
        }
    }
}
