//! Compile and link argument planning
//!
//! Raw option lines from the manifest (search paths, flags, sources, objects,
//! libraries) are normalized into an [`ArgumentVector`]. Search paths are
//! hoisted to the front and deduplicated, libraries are collected once and
//! emitted after every input so archive interdependencies resolve.

use super::config::BuildConfig;
use crate::config::LibraryOrdering;
use crate::manifest::{extension, short_name, short_stem};
use std::path::PathBuf;

/// Flags whose value may arrive as the following line
const VALUE_FLAGS: &[&str] = &["-I", "-L", "-o", "-B", "-b", "-V", "-x", "-X"];

const MEMTYPE_PREFIX: &str = "memtype=";

const GC_SECTION_FLAGS: &[&str] = &["-ffunction-sections", "-fdata-sections", "-Wl,--gc-sections"];

/// Extensions compiled to objects before the final link
const COMPILABLE: &[&str] = &["c", "cpp", "cc", "cxx", "c++"];

/// Extensions moved into the project archive in library mode
const OBJECTS: &[&str] = &["o", "cog", "ecog"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentVector {
    /// `-I`/`-L` pairs in discovery order
    pub search_paths: Vec<(String, String)>,
    pub flags: Vec<String>,
    pub inputs: Vec<String>,
    pub main: Option<String>,
    pub archives: Vec<String>,
    /// Distinct `-l` flags in first-seen order
    pub libraries: Vec<String>,
    pub ordering: LibraryOrdering,
    pub strip: bool,
    pub model: String,
    pub output: String,
    pub warnings: Vec<String>,
}

impl ArgumentVector {
    /// Full link command arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = self.search_args();
        args.extend(self.flags.iter().cloned());
        args.extend(self.inputs.iter().cloned());
        args.extend(self.main.iter().cloned());
        args.extend(self.archives.iter().cloned());
        args.extend(self.library_args());
        if self.strip {
            args.push("-s".to_string());
        }
        args
    }

    /// Arguments compiling one source to one object, with the link output removed
    pub fn compile_args(&self, source: &str, object: &str) -> Vec<String> {
        let mut args = self.search_args();
        let mut flags = self.flags.iter();
        while let Some(flag) = flags.next() {
            if flag == "-o" {
                flags.next();
                continue;
            }
            args.push(flag.clone());
        }
        args.extend(["-c".to_string(), source.to_string(), "-o".to_string(), object.to_string()]);
        args
    }

    /// Non-main inputs that still need compiling to objects
    pub fn compilable_inputs(&self) -> Vec<String> {
        self.inputs
            .iter()
            .filter(|input| has_extension(input, COMPILABLE))
            .cloned()
            .collect()
    }

    pub fn replace_input(&mut self, from: &str, to: &str) {
        for input in self.inputs.iter_mut().filter(|i| i.as_str() == from) {
            *input = to.to_string();
        }
    }

    /// Removes and returns object inputs (`.o`, `.cog`, `.ecog`)
    pub fn take_objects(&mut self) -> Vec<String> {
        let (objects, rest): (Vec<String>, Vec<String>) = std::mem::take(&mut self.inputs)
            .into_iter()
            .partition(|input| has_extension(input, OBJECTS));
        self.inputs = rest;
        objects
    }

    pub fn search_args(&self) -> Vec<String> {
        self.search_paths
            .iter()
            .flat_map(|(flag, path)| [flag.clone(), path.clone()])
            .collect()
    }

    fn library_args(&self) -> Vec<String> {
        if self.libraries.is_empty() {
            return Vec::new();
        }
        match self.ordering {
            LibraryOrdering::Repeat => {
                let mut args = Vec::with_capacity(self.libraries.len() * self.libraries.len());
                for _ in 0..self.libraries.len() {
                    args.extend(self.libraries.iter().cloned());
                }
                args
            }
            LibraryOrdering::Group => {
                let mut args = vec!["-Wl,--start-group".to_string()];
                args.extend(self.libraries.iter().cloned());
                args.push("-Wl,--end-group".to_string());
                args
            }
        }
    }

    fn has_search_path(&self, flag: &str, path: &str) -> bool {
        self.search_paths.iter().any(|(f, p)| f == flag && p == path)
    }

    fn push_search_path(&mut self, flag: &str, path: &str) {
        if !self.has_search_path(flag, path) {
            self.search_paths.push((flag.to_string(), path.to_string()));
        }
    }

    fn push_flag(&mut self, flag: &str) {
        if !self.flags.iter().any(|f| f == flag) {
            self.flags.push(flag.to_string());
        }
    }

    fn push_flag_pair(&mut self, flag: &str, value: &str) {
        let present = self
            .flags
            .windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value);
        if !present {
            self.flags.push(flag.to_string());
            self.flags.push(value.to_string());
        }
    }

    fn push_library(&mut self, library: &str) {
        if !self.libraries.iter().any(|l| l == library) {
            self.libraries.push(library.to_string());
        }
    }
}

/// Builds the compile/link argument vector for one build
pub struct ArgumentPlanner<'a> {
    config: &'a BuildConfig,
    output: String,
    main: Option<String>,
    library_dirs: Vec<PathBuf>,
    ordering: LibraryOrdering,
}

impl<'a> ArgumentPlanner<'a> {
    pub fn new(config: &'a BuildConfig, output: impl Into<String>) -> Self {
        Self {
            config,
            output: output.into(),
            main: None,
            library_dirs: Vec::new(),
            ordering: LibraryOrdering::default(),
        }
    }

    /// Entry-point source, emitted after every other input
    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = Some(main.into());
        self
    }

    /// Library directories found by include scanning
    pub fn with_library_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.library_dirs = dirs;
        self
    }

    pub fn with_ordering(mut self, ordering: LibraryOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn plan<S: AsRef<str>>(&self, lines: &[S]) -> ArgumentVector {
        let mut lines: Vec<&str> = lines
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();

        let mut model = self.config.model().to_string();
        if let Some(first) = lines.first() {
            if let Some(value) = first.strip_prefix(MEMTYPE_PREFIX) {
                if let Some(word) = value.split_whitespace().next() {
                    model = word.to_string();
                }
                lines.remove(0);
            }
        }

        let mut vector = ArgumentVector {
            search_paths: Vec::new(),
            flags: Vec::new(),
            inputs: Vec::new(),
            main: self.main.clone(),
            archives: Vec::new(),
            libraries: Vec::new(),
            ordering: self.ordering,
            strip: self.config.strip,
            model: model.clone(),
            output: self.output.clone(),
            warnings: Vec::new(),
        };

        let debug_line = lines.first() == Some(&"-g");
        if debug_line {
            lines.remove(0);
        }
        if debug_line || self.config.debug {
            vector.push_flag("-g");
        }
        vector.push_flag_pair("-o", &self.output);
        if !self.config.optimization.is_empty() {
            vector.push_flag(&self.config.optimization);
        }
        vector.push_flag(&format!("-m{}", model));
        vector.push_search_path("-I", ".");
        vector.push_search_path("-L", ".");

        self.feature_flags(&mut vector);

        let compile_tokens: Vec<&str> = self.config.compile_options.split_whitespace().collect();
        self.absorb_tokens(&mut vector, &compile_tokens);

        self.absorb_lines(&mut vector, &lines);
        self.add_library_dirs(&mut vector);
        self.add_libraries(&mut vector);

        vector
    }

    fn feature_flags(&self, vector: &mut ArgumentVector) {
        let config = self.config;
        let cog = vector.model.to_lowercase().contains("cog");

        if config.warn_all {
            vector.push_flag("-Wall");
        }
        if config.double32 {
            vector.push_flag("-m32bit-doubles");
        }
        if !config.exceptions {
            vector.push_flag("-fno-exceptions");
        }
        for (enabled, flag, label) in [
            (config.no_fcache, "-mno-fcache", "No fcache"),
            (config.simple_printf, "-Dprintf=__simple_printf", "Simple printf"),
        ] {
            if !enabled {
                continue;
            }
            if cog {
                vector
                    .warnings
                    .push(format!("Ignoring \"{}\" flag in COG mode program.", label));
            } else if config.tiny_lib {
                vector
                    .warnings
                    .push(format!("Ignoring \"{}\" flag in a program using -ltiny.", label));
            } else {
                vector.push_flag(flag);
            }
        }
        if config.is_cpp() && !config.rtti {
            vector.push_flag("-fno-rtti");
        }
        if config.gc_sections {
            for flag in GC_SECTION_FLAGS {
                vector.push_flag(flag);
            }
        }
    }

    /// Option lines: a line may hold a flag and its value separated by spaces
    fn absorb_lines(&self, vector: &mut ArgumentVector, lines: &[&str]) {
        let mut index = 0;
        while index < lines.len() {
            let line = lines[index];
            index += 1;

            if line.starts_with('-') {
                if let Some((flag, value)) = line.split_once(char::is_whitespace) {
                    self.absorb_flag(vector, flag, Some(value.trim()));
                    continue;
                }
                if VALUE_FLAGS.contains(&line) {
                    let value = lines.get(index).copied();
                    if value.is_some() {
                        index += 1;
                    }
                    self.absorb_flag(vector, line, value);
                    continue;
                }
            }
            self.absorb_single(vector, line);
        }
    }

    /// Whitespace separated tokens, as found in extra compiler options
    fn absorb_tokens(&self, vector: &mut ArgumentVector, tokens: &[&str]) {
        let mut index = 0;
        while index < tokens.len() {
            let token = tokens[index];
            index += 1;
            if VALUE_FLAGS.contains(&token) {
                let value = tokens.get(index).copied();
                if value.is_some() {
                    index += 1;
                }
                self.absorb_flag(vector, token, value);
            } else {
                self.absorb_single(vector, token);
            }
        }
    }

    fn absorb_single(&self, vector: &mut ArgumentVector, item: &str) {
        for flag in ["-I", "-L"] {
            if let Some(value) = item.strip_prefix(flag) {
                if !value.is_empty() {
                    self.absorb_flag(vector, flag, Some(value));
                    return;
                }
            }
        }

        if item == "-s" {
            vector.strip = true;
        } else if item.starts_with("-l") {
            vector.push_library(item);
        } else if item.starts_with('-') {
            vector.push_flag(item);
        } else if item.to_lowercase().ends_with(".cfg") || item.ends_with(".h") {
            // headers and board configs never reach the compiler
        } else if has_extension(item, &["a"]) {
            if !vector.archives.iter().any(|a| a == item) {
                vector.archives.push(item.to_string());
            }
        } else if Some(item) == vector.main.as_deref() {
            // main goes last
        } else if !vector.inputs.iter().any(|i| i == item) {
            vector.inputs.push(item.to_string());
        }
    }

    fn absorb_flag(&self, vector: &mut ArgumentVector, flag: &str, value: Option<&str>) {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            vector.push_flag(flag);
            return;
        };

        match flag {
            "-I" => vector.push_search_path("-I", value),
            "-L" => self.absorb_library_path(vector, value),
            "-o" if value == vector.output => {}
            _ => vector.push_flag_pair(flag, value),
        }
    }

    fn absorb_library_path(&self, vector: &mut ArgumentVector, value: &str) {
        // Already planned, verbatim
        if vector.has_search_path("-L", value) {
            return;
        }

        let base = value.trim_end_matches('/');
        let base = if base.is_empty() { value } else { base };
        let model_suffix = format!("/{}", vector.model);
        let (include_dir, library_dir) = match base.strip_suffix(&model_suffix) {
            Some(stripped) if !stripped.is_empty() => (stripped, format!("{}/", base)),
            _ => (base, format!("{}{}/", base, model_suffix)),
        };

        vector.push_search_path("-L", &library_dir);
        vector.push_search_path("-I", include_dir);

        if let Some(name) = short_name(include_dir).strip_prefix("lib") {
            if !name.is_empty() {
                vector.push_library(&format!("-l{}", name));
            }
        }
    }

    fn add_library_dirs(&self, vector: &mut ArgumentVector) {
        for dir in &self.library_dirs {
            let dir = dir.display().to_string();
            let name = short_name(dir.trim_end_matches('/')).to_string();

            let known = vector.search_paths.iter().any(|(_, path)| {
                let path = path.trim_end_matches('/');
                let path = path
                    .strip_suffix(&format!("/{}", vector.model))
                    .unwrap_or(path);
                path.ends_with(&name)
            });
            if !known {
                vector.push_search_path("-I", &dir);
                vector.push_search_path("-L", &format!("{}/{}/", dir, vector.model));
            }
            if let Some(lib) = name.strip_prefix("lib").filter(|n| !n.is_empty()) {
                vector.push_library(&format!("-l{}", lib));
            }
        }
    }

    fn add_libraries(&self, vector: &mut ArgumentVector) {
        let config = self.config;
        let cog = vector.model.to_lowercase().contains("cog");

        if config.tiny_lib {
            if cog {
                vector
                    .warnings
                    .push("Ignoring \"-ltiny\" flag in COG mode programs.".to_string());
            } else if config.math_lib {
                vector
                    .warnings
                    .push("Ignoring \"-ltiny\" flag in -lm floating point programs.".to_string());
            } else {
                vector.push_library("-ltiny");
            }
        }
        if config.math_lib {
            vector.push_library("-lm");
        }
        if config.pthread_lib {
            vector.push_library("-lpthread");
        }
        for option in config.link_options.split_whitespace() {
            if option.starts_with("-l") {
                vector.push_library(option);
            } else {
                vector.push_flag(option);
            }
        }
    }
}

/// Object path `<out>/<stem>.o` for a compiled source
pub fn object_path(out_dir: &str, source: &str) -> String {
    format!("{}/{}.o", out_dir, short_stem(source))
}

fn has_extension(path: &str, extensions: &[&str]) -> bool {
    extension(path).is_some_and(|ext| extensions.contains(&ext.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::config::CompilerKind;

    fn planner(config: &BuildConfig) -> ArgumentPlanner<'_> {
        ArgumentPlanner::new(config, "lmm/main.elf").with_main("main.c")
    }

    #[test]
    fn test_basic_link_vector() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["util.o", "lmm/blob_firmware.o"]);

        assert_eq!(
            vector.to_args(),
            vec![
                "-I", ".", "-L", ".", "-o", "lmm/main.elf", "-Os", "-mlmm", "util.o",
                "lmm/blob_firmware.o", "main.c",
            ]
        );
    }

    #[test]
    fn test_library_path_gets_model_suffix_and_include() {
        let config = BuildConfig {
            memory_model: "xmm".to_string(),
            ..Default::default()
        };
        let vector = planner(&config).plan(&["-L mylib"]);

        assert_eq!(
            vector.search_paths,
            vec![
                ("-I".to_string(), ".".to_string()),
                ("-L".to_string(), ".".to_string()),
                ("-L".to_string(), "mylib/xmm/".to_string()),
                ("-I".to_string(), "mylib".to_string()),
            ]
        );
    }

    #[test]
    fn test_library_path_already_suffixed() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["-L ../libfoo/lmm/"]);

        assert!(vector.search_paths.contains(&("-L".into(), "../libfoo/lmm/".into())));
        assert!(vector.search_paths.contains(&("-I".into(), "../libfoo".into())));
        assert_eq!(vector.libraries, vec!["-lfoo"]);
    }

    #[test]
    fn test_existing_include_not_duplicated() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["-I ../libfoo", "-L ../libfoo"]);

        let includes = vector
            .search_paths
            .iter()
            .filter(|(f, p)| f == "-I" && p == "../libfoo")
            .count();
        assert_eq!(includes, 1);
        assert_eq!(vector.search_paths[2], ("-I".into(), "../libfoo".into()));
    }

    #[test]
    fn test_planning_own_output_is_stable() {
        let config = BuildConfig {
            memory_model: "xmm".to_string(),
            ..Default::default()
        };
        let first = planner(&config).plan(&["-I inc", "-L mylib", "-L ../libservo", "util.o"]);
        let second = planner(&config).plan(&first.to_args());

        assert_eq!(second.search_paths, first.search_paths);
        assert_eq!(second.inputs, first.inputs);
        assert_eq!(second.flags, first.flags);
    }

    #[test]
    fn test_memtype_first_line_overrides_model() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["memtype=cmm compact", "-L mylib"]);

        assert_eq!(vector.model, "cmm");
        assert!(vector.flags.contains(&"-mcmm".to_string()));
        assert!(vector.search_paths.contains(&("-L".into(), "mylib/cmm/".into())));
    }

    #[test]
    fn test_first_line_debug() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["-g", "util.c"]);
        assert_eq!(vector.flags[0], "-g");
        assert_eq!(vector.inputs, vec!["util.c"]);
    }

    #[test]
    fn test_cfg_and_headers_dropped() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["util.h", "board.CFG", "util.c", "main.c"]);
        assert_eq!(vector.inputs, vec!["util.c"]);
        assert_eq!(vector.main.as_deref(), Some("main.c"));
    }

    #[test]
    fn test_library_repetition() {
        let config = BuildConfig {
            math_lib: true,
            pthread_lib: true,
            ..Default::default()
        };
        let vector = planner(&config).plan(&["-lsimpletools", "-lm"]);

        assert_eq!(vector.libraries, vec!["-lsimpletools", "-lm", "-lpthread"]);
        let args = vector.to_args();
        let tail: Vec<&str> = args[args.len() - 9..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "-lsimpletools", "-lm", "-lpthread", "-lsimpletools", "-lm", "-lpthread",
                "-lsimpletools", "-lm", "-lpthread",
            ]
        );
    }

    #[test]
    fn test_library_group() {
        let config = BuildConfig {
            math_lib: true,
            ..Default::default()
        };
        let vector = planner(&config)
            .with_ordering(LibraryOrdering::Group)
            .plan(&["-lsimpletools"]);

        let args = vector.to_args();
        assert_eq!(
            &args[args.len() - 4..],
            &["-Wl,--start-group", "-lsimpletools", "-lm", "-Wl,--end-group"]
        );
    }

    #[test]
    fn test_final_order() {
        let config = BuildConfig {
            strip: true,
            ..Default::default()
        };
        let vector = planner(&config).plan(&["-lm", "libextra.a", "util.o", "-I inc"]);

        let args = vector.to_args();
        assert_eq!(
            args,
            vec![
                "-I", ".", "-L", ".", "-I", "inc", "-o", "lmm/main.elf", "-Os", "-mlmm", "util.o",
                "main.c", "libextra.a", "-lm", "-s",
            ]
        );
    }

    #[test]
    fn test_suppressed_flags_warn() {
        let config = BuildConfig {
            memory_model: "cog".to_string(),
            no_fcache: true,
            simple_printf: true,
            tiny_lib: true,
            ..Default::default()
        };
        let vector = planner(&config).plan::<&str>(&[]);

        assert!(!vector.flags.contains(&"-mno-fcache".to_string()));
        assert!(!vector.flags.contains(&"-Dprintf=__simple_printf".to_string()));
        assert!(!vector.libraries.contains(&"-ltiny".to_string()));
        assert_eq!(vector.warnings.len(), 3);
    }

    #[test]
    fn test_tiny_lib_dropped_with_math() {
        let config = BuildConfig {
            tiny_lib: true,
            math_lib: true,
            ..Default::default()
        };
        let vector = planner(&config).plan::<&str>(&[]);
        assert_eq!(vector.libraries, vec!["-lm"]);
        assert_eq!(vector.warnings.len(), 1);
    }

    #[test]
    fn test_feature_flags() {
        let config = BuildConfig {
            compiler: CompilerKind::Cpp,
            warn_all: true,
            double32: true,
            exceptions: false,
            gc_sections: true,
            compile_options: "-DRATE=9600 -I extra".to_string(),
            ..Default::default()
        };
        let vector = planner(&config).plan::<&str>(&[]);

        for flag in [
            "-Wall",
            "-m32bit-doubles",
            "-fno-exceptions",
            "-fno-rtti",
            "-ffunction-sections",
            "-fdata-sections",
            "-Wl,--gc-sections",
            "-DRATE=9600",
        ] {
            assert!(vector.flags.contains(&flag.to_string()), "missing {}", flag);
        }
        assert!(vector.search_paths.contains(&("-I".into(), "extra".into())));
    }

    #[test]
    fn test_resolved_library_dirs() {
        let config = BuildConfig::default();
        let vector = planner(&config)
            .with_library_dirs(vec![
                PathBuf::from("/lib/Utility/libsimpletools"),
                PathBuf::from("/lib/Text/libsimpletext"),
            ])
            .plan(&["-I ../libsimpletext"]);

        assert!(vector
            .search_paths
            .contains(&("-L".into(), "/lib/Utility/libsimpletools/lmm/".into())));
        assert!(!vector
            .search_paths
            .iter()
            .any(|(_, p)| p.starts_with("/lib/Text")));
        assert_eq!(vector.libraries, vec!["-lsimpletools", "-lsimpletext"]);
    }

    #[test]
    fn test_compile_args_drop_link_output() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["util.c", "-lm"]);

        assert_eq!(vector.compilable_inputs(), vec!["util.c"]);
        assert_eq!(
            vector.compile_args("util.c", "lmm/util.o"),
            vec!["-I", ".", "-L", ".", "-Os", "-mlmm", "-c", "util.c", "-o", "lmm/util.o"]
        );
    }

    #[test]
    fn test_take_objects_and_replace() {
        let config = BuildConfig::default();
        let mut vector = planner(&config).plan(&["util.c", "lmm/sensor.cog", "lmm/boot.o"]);

        vector.replace_input("util.c", "lmm/util.o");
        assert_eq!(vector.take_objects(), vec!["lmm/util.o", "lmm/sensor.cog", "lmm/boot.o"]);
        assert!(vector.inputs.is_empty());
    }

    #[test]
    fn test_malformed_lines_pass_through() {
        let config = BuildConfig::default();
        let vector = planner(&config).plan(&["-Wl,--defsym,FOO=1", "--weird flag value"]);
        assert!(vector.flags.contains(&"-Wl,--defsym,FOO=1".to_string()));
        assert!(vector.flags.ends_with(&["--weird".to_string(), "flag value".to_string()]));
    }

    #[test]
    fn test_object_path() {
        assert_eq!(object_path("lmm", "src/util.c"), "lmm/util.o");
    }
}
