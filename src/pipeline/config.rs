use tracing::debug;

/// Language the main compiler driver is invoked for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompilerKind {
    #[default]
    C,
    Cpp,
}

/// Resolved parameters for one build; immutable once the build starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    /// Memory model selector, possibly followed by a description ("lmm main ram")
    pub memory_model: String,
    pub optimization: String,
    pub compiler: CompilerKind,
    pub debug: bool,
    pub warn_all: bool,
    pub double32: bool,
    pub exceptions: bool,
    pub rtti: bool,
    pub no_fcache: bool,
    pub simple_printf: bool,
    pub tiny_lib: bool,
    pub math_lib: bool,
    pub pthread_lib: bool,
    pub gc_sections: bool,
    pub strip: bool,
    pub compile_options: String,
    pub link_options: String,
    pub spin_options: String,
    pub make_library: bool,
    pub auto_library: bool,
    pub sd_package: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            memory_model: "lmm".to_string(),
            optimization: "-Os".to_string(),
            compiler: CompilerKind::C,
            debug: false,
            warn_all: false,
            double32: false,
            exceptions: true,
            rtti: false,
            no_fcache: false,
            simple_printf: false,
            tiny_lib: false,
            math_lib: false,
            pthread_lib: false,
            gc_sections: false,
            strip: false,
            compile_options: String::new(),
            link_options: String::new(),
            spin_options: String::new(),
            make_library: false,
            auto_library: false,
            sd_package: false,
        }
    }
}

impl BuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies manifest directives (text after the leading `>`) in order
    pub fn from_directives<'a, I>(directives: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = Self::default();
        for directive in directives {
            config.apply_directive(directive);
        }
        config
    }

    pub fn apply_directive(&mut self, directive: &str) {
        let directive = directive.trim();
        if let Some(value) = directive.strip_prefix("compiler=") {
            self.compiler = match value.trim().to_uppercase().as_str() {
                "C++" | "CPP" => CompilerKind::Cpp,
                _ => CompilerKind::C,
            };
        } else if let Some(value) = directive.strip_prefix("memtype=") {
            if !value.trim().is_empty() {
                self.memory_model = value.trim().to_string();
            }
        } else if let Some(value) = directive.strip_prefix("optimize=") {
            self.optimization = value.trim().to_string();
        } else if let Some(value) = directive.strip_prefix("defs::") {
            self.compile_options = value.trim().to_string();
        } else if let Some(value) = directive.strip_prefix("linker::") {
            self.link_options = value.trim().to_string();
        } else if let Some(value) = directive.strip_prefix("spincomp::") {
            self.spin_options = value.trim().to_string();
        } else {
            match directive {
                "-g" => self.debug = true,
                "-Wall" => self.warn_all = true,
                "-m32bit-doubles" => self.double32 = true,
                "-fno-exceptions" => self.exceptions = false,
                "-fexceptions" => self.exceptions = true,
                "rtti" => self.rtti = true,
                "-mno-fcache" => self.no_fcache = true,
                "-Dprintf=__simple_printf" => self.simple_printf = true,
                "-ltiny" => self.tiny_lib = true,
                "-lm" => self.math_lib = true,
                "-lpthread" => self.pthread_lib = true,
                "-ffunction-sections" => self.gc_sections = true,
                "-s" => self.strip = true,
                "makelib" => self.make_library = true,
                "autolib" => self.auto_library = true,
                "sdload" => self.sd_package = true,
                other => debug!(directive = other, "Ignoring unknown project directive"),
            }
        }
    }

    /// Memory model selector without any trailing description
    pub fn model(&self) -> &str {
        self.memory_model.split_whitespace().next().unwrap_or("lmm")
    }

    /// Output directory for intermediate and final artifacts
    pub fn output_dir_name(&self) -> String {
        self.model()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
            .collect()
    }

    /// Cog-only models run without the kernel cache and the full C library
    pub fn is_cog_model(&self) -> bool {
        self.model().eq_ignore_ascii_case("cog")
    }

    /// External-memory models cannot be stripped by the loader
    pub fn is_xmm(&self) -> bool {
        self.model().to_lowercase().starts_with("xmm")
    }

    pub fn is_cpp(&self) -> bool {
        self.compiler == CompilerKind::Cpp
    }
}
