//! End-to-end builds driven through the orchestrator with a recording invoker

use cogbuild::pipeline::{BuildOrchestrator, BuildRequest, BuildStatus};
use cogbuild::progress::{ProgressEvent, ProgressHandler};
use cogbuild::tools::{RecordingInvoker, ScriptedResponse};
use cogbuild::ToolchainConfig;
use filetime::{set_file_mtime, FileTime};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const OBJDUMP: &str = "
main.elf:     file format elf32-propeller

Sections:
Idx Name          Size      VMA       LMA       File off  Algn
  0 .text         00000a30  00000020  00000020  000000b4  2**2
                  CONTENTS, ALLOC, LOAD, READONLY, CODE
  1 .bss          00000100  00000a50  00000a50  00000ae4  2**2
                  ALLOC
";

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_files(dir.path(), files);
    dir
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, body) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }
}

fn orchestrator(invoker: &Arc<RecordingInvoker>) -> BuildOrchestrator {
    BuildOrchestrator::new(ToolchainConfig::default(), invoker.clone())
}

#[derive(Default)]
struct Collecting {
    events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressHandler for Collecting {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Cancels the build once the first tool call has finished
struct CancelAfterFirstTool {
    cancel: CancellationToken,
}

impl ProgressHandler for CancelAfterFirstTool {
    fn on_progress(&self, event: &ProgressEvent) {
        if matches!(event, ProgressEvent::ToolFinished(_)) {
            self.cancel.cancel();
        }
    }
}

#[tokio::test]
async fn test_c_project_with_blob() {
    let dir = project(&[
        ("main.side", "main.c\nutil.c\nblob.dat\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("util.c", "int util(void) { return 1; }"),
        ("blob.dat", "\x01\x02\x03"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    invoker.respond(ScriptedResponse::matching("objdump").stdout(OBJDUMP));

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, BuildStatus::Succeeded);
    assert_eq!(result.exit_code, 0);
    assert_eq!(result.artifact, Some(dir.path().join("lmm/main.elf")));
    assert_eq!(
        invoker.command_lines(),
        vec![
            "propeller-elf-objcopy -I binary -B propeller -O propeller-elf-gcc \
             --redefine-sym _binary_blob_dat_start=_binary_blob_firmware_start \
             --redefine-sym _binary_blob_dat_end=_binary_blob_firmware_end \
             --redefine-sym _binary_blob_dat_size=_binary_blob_firmware_size \
             blob.dat lmm/blob_firmware.o",
            "propeller-elf-gcc -I . -L . -Os -mlmm -c util.c -o lmm/util.o",
            "propeller-elf-gcc -I . -L . -o lmm/main.elf -Os -mlmm \
             lmm/util.o lmm/blob_firmware.o main.c",
            "propeller-load -s lmm/main.elf",
            "propeller-elf-objdump -h lmm/main.elf",
        ]
    );
    assert!(invoker
        .calls()
        .iter()
        .all(|call| call.working_dir == dir.path()));

    let size = result.size.unwrap();
    assert_eq!(size.code_size, 0xa30);
    assert_eq!(size.total_size, 0xa30 + 0x100);
    assert!(dir.path().join("lmm").is_dir());
}

#[tokio::test]
async fn test_up_to_date_project_not_rebuilt() {
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("lmm/main.elf", "ELF"),
    ]);
    set_file_mtime(
        dir.path().join("main.c"),
        FileTime::from_unix_time(1_600_000_000, 0),
    )
    .unwrap();
    set_file_mtime(
        dir.path().join("lmm/main.elf"),
        FileTime::from_unix_time(1_700_000_000, 0),
    )
    .unwrap();
    let invoker = Arc::new(RecordingInvoker::new());
    let build = orchestrator(&invoker);

    let result = build
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, BuildStatus::NotNeeded);
    assert_eq!(result.exit_code, 0);
    assert_eq!(invoker.call_count(), 0);

    let forced = build
        .run(
            BuildRequest::new(dir.path().join("main.side")).force(true),
            CancellationToken::new(),
        )
        .await;
    assert_eq!(forced.status, BuildStatus::Succeeded);
    assert!(invoker.call_count() > 0);
}

#[tokio::test]
async fn test_cog_c_linked_as_image() {
    let dir = project(&[
        ("main.side", "main.c\nsensor.cogc\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("sensor.cogc", "void main(void) {}"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    let lines = invoker.command_lines();
    assert_eq!(
        lines[0],
        "propeller-elf-gcc -r -Os -mcog -o lmm/sensor.cog -xc sensor.cogc"
    );
    assert_eq!(
        lines[1],
        "propeller-elf-objcopy --localize-text --rename-section .text=sensor.cog lmm/sensor.cog"
    );
    assert_eq!(
        lines[2],
        "propeller-elf-gcc -I . -L . -o lmm/main.elf -Os -mlmm lmm/sensor.cog main.c"
    );
}

#[tokio::test]
async fn test_embedded_spin_staged_through_data() {
    let dir = project(&[
        ("main.side", "main.c\nfast.espin\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("fast.espin", "PUB main"),
    ]);
    let invoker = Arc::new(RecordingInvoker::materializing());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert!(dir.path().join("tmp.spin").is_file());
    assert!(dir.path().join("lmm/fast.edat").is_file());
    assert_eq!(
        result.programs(),
        vec![
            "openspin",
            "propeller-elf-objcopy",
            "propeller-elf-objcopy",
            "propeller-elf-gcc",
            "propeller-load",
            "propeller-elf-objdump",
        ]
    );
    let link = &invoker.command_lines()[3];
    assert!(link.ends_with("lmm/fast_firmware.o main.c"));
}

#[tokio::test]
async fn test_uppercase_embedded_spin_extension() {
    let dir = project(&[
        ("main.side", "main.c\nDriver.ESPIN\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("Driver.ESPIN", "PUB main"),
    ]);
    let invoker = Arc::new(RecordingInvoker::materializing());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(fs::read_to_string(dir.path().join("tmp.spin")).unwrap(), "PUB main");
    assert!(dir.path().join("lmm/Driver.edat").is_file());
}

#[tokio::test]
async fn test_dry_run_leaves_project_untouched() {
    let dir = project(&[
        ("main.side", "main.c\nfast.espin\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("fast.espin", "PUB main"),
        ("lmm/main.elf", "ELF"),
        ("main.pex", "PEX"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side"))
                .force(true)
                .dry_run(true),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert!(invoker.call_count() > 0);
    assert_eq!(fs::read_to_string(dir.path().join("lmm/main.elf")).unwrap(), "ELF");
    assert_eq!(fs::read_to_string(dir.path().join("main.pex")).unwrap(), "PEX");
    assert!(!dir.path().join("tmp.spin").exists());
    assert!(!dir.path().join("lmm/fast.edat").exists());
}

#[tokio::test]
async fn test_dry_run_does_not_create_output_dir() {
    let dir = project(&[
        ("main.side", "main.c\n>memtype=cmm\n"),
        ("main.c", "int main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")).dry_run(true),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success(), "{:?}", result.error);
    assert!(!dir.path().join("cmm").exists());
}

#[tokio::test]
async fn test_link_failure_propagates_exit_code() {
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "int main(void) { blink(); }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    invoker.respond(
        ScriptedResponse::matching("main.c")
            .exit_code(1)
            .stderr("main.c:(.text+0x1c): undefined reference to `_blink'\ncollect2: ld returned 1 exit status"),
    );
    let handler = Arc::new(Collecting::default());

    let result = orchestrator(&invoker)
        .with_progress_handler(handler.clone())
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.exit_code, 1);
    assert_eq!(result.failed_stage.as_deref(), Some("link"));
    assert_eq!(
        result.diagnosis,
        vec!["Check source for bad function call or global variable name blink"]
    );
    // nothing runs after a failed link
    assert_eq!(invoker.call_count(), 1);

    let events = handler.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, ProgressEvent::Diagnosis { .. })));
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Completed { exit_code: 1, .. })
    ));
}

#[tokio::test]
async fn test_compile_failure_stops_build() {
    let dir = project(&[
        ("main.side", "main.c\nutil.c\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("util.c", "int util(void) { return 1 }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    invoker.respond(
        ScriptedResponse::matching("-c util.c")
            .exit_code(2)
            .stderr("util.c:1:28: error: expected ';' before '}' token"),
    );

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.exit_code, 2);
    assert_eq!(result.failed_stage.as_deref(), Some("compile"));
    assert_eq!(
        result.diagnosis,
        vec!["Click error or warning messages above to debug."]
    );
    assert_eq!(invoker.call_count(), 1);
}

#[tokio::test]
async fn test_cancelled_before_first_entry() {
    let dir = project(&[
        ("main.side", "main.c\nutil.c\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("util.c", "int util(void) { return 1; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator(&invoker)
        .run(BuildRequest::new(dir.path().join("main.side")), cancel)
        .await;

    assert_eq!(result.status, BuildStatus::Cancelled);
    assert_eq!(result.exit_code, -1);
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test]
async fn test_cancelled_between_object_compiles() {
    let dir = project(&[
        ("main.side", "main.c\nutil.c\nextra.c\n"),
        ("main.c", "int main(void) { return 0; }"),
        ("util.c", "int util(void) { return 1; }"),
        ("extra.c", "int extra(void) { return 2; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    let cancel = CancellationToken::new();
    let handler = Arc::new(CancelAfterFirstTool {
        cancel: cancel.clone(),
    });

    let result = orchestrator(&invoker)
        .with_progress_handler(handler)
        .run(BuildRequest::new(dir.path().join("main.side")), cancel)
        .await;

    assert_eq!(result.status, BuildStatus::Cancelled);
    assert_eq!(
        invoker.command_lines(),
        vec!["propeller-elf-gcc -I . -L . -Os -mlmm -c util.c -o lmm/util.o"]
    );
}

#[tokio::test]
async fn test_cancelled_main_only_project_never_links() {
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "int main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator(&invoker)
        .run(BuildRequest::new(dir.path().join("main.side")), cancel)
        .await;

    assert_eq!(result.status, BuildStatus::Cancelled);
    assert_eq!(invoker.call_count(), 0);
}

#[tokio::test]
async fn test_library_mode_archives_objects() {
    let dir = project(&[
        ("servo.side", "servo.c\nservo_pins.c\n"),
        ("servo.c", "int main(void) { return 0; }"),
        ("servo_pins.c", "int pins;"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("servo.side")).make_library(true),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    assert_eq!(result.archive, Some(dir.path().join("lmm/servo.a")));
    let lines = invoker.command_lines();
    assert_eq!(lines[1], "propeller-elf-ar rs lmm/servo.a lmm/servo_pins.o");
    assert_eq!(
        lines[2],
        "propeller-elf-gcc -I . -L . -o lmm/servo.elf -Os -mlmm servo.c lmm/servo.a"
    );
}

#[tokio::test]
async fn test_auto_library_from_includes() {
    let root = TempDir::new().unwrap();
    write_files(
        root.path(),
        &[("libservo/servo.h", "void servo_set(int pin);"), ("libservo/lmm/.keep", "")],
    );
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "#include \"servo.h\"\nint main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    let config = ToolchainConfig {
        library_root: Some(root.path().to_path_buf()),
        ..Default::default()
    };
    let build = BuildOrchestrator::new(config, invoker.clone());

    let result = build
        .run(
            BuildRequest::new(dir.path().join("main.side")).auto_library(true),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    let library = root.path().join("libservo").display().to_string();
    let link = &invoker.command_lines()[0];
    assert!(link.contains(&format!("-I {}", library)));
    assert!(link.contains(&format!("-L {}/lmm/", library)));
    assert!(link.ends_with("main.c -lservo"));
    assert_eq!(build.cached_libraries(), 1);
}

#[tokio::test]
async fn test_auto_library_without_root_warns() {
    let dir = project(&[
        ("main.side", "main.c\n>autolib\n"),
        ("main.c", "#include \"servo.h\""),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("library root")));
}

#[tokio::test]
async fn test_second_build_of_same_project_rejected() {
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "int main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    let build = orchestrator(&invoker);
    let project_file = dir.path().join("main.side");

    let (first, second) = tokio::join!(
        build.run(BuildRequest::new(&project_file), CancellationToken::new()),
        build.run(BuildRequest::new(&project_file), CancellationToken::new()),
    );

    assert_eq!(first.status, BuildStatus::Succeeded);
    assert_eq!(second.status, BuildStatus::Failed);
    assert!(second.error.unwrap().contains("already running"));
}

#[tokio::test]
async fn test_post_link_problems_are_warnings() {
    let dir = project(&[
        ("main.side", "main.c\n>sdload\n"),
        ("main.c", "int main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    invoker.respond(ScriptedResponse::matching("-s lmm/main.elf").exit_code(1));

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.status, BuildStatus::Succeeded);
    assert!(invoker
        .command_lines()
        .contains(&"propeller-load -x lmm/main.elf".to_string()));
    assert!(result.warnings.iter().any(|w| w.contains("strip")));
    assert!(result.warnings.iter().any(|w| w.contains("AUTORUN.PEX")));
    assert!(result.warnings.iter().any(|w| w.contains("program size")));
}

#[tokio::test]
async fn test_external_memory_model_skips_strip() {
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "int main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());

    let result = orchestrator(&invoker)
        .run(
            BuildRequest::new(dir.path().join("main.side")).memory_model("xmmc"),
            CancellationToken::new(),
        )
        .await;

    assert!(result.is_success());
    assert_eq!(result.artifact, Some(dir.path().join("xmmc/main.elf")));
    assert_eq!(
        invoker.command_lines(),
        vec![
            "propeller-elf-gcc -I . -L . -o xmmc/main.elf -Os -mxmmc main.c",
            "propeller-elf-objdump -h xmmc/main.elf",
        ]
    );
}

#[tokio::test]
async fn test_progress_event_sequence() {
    let dir = project(&[
        ("main.side", "main.c\n"),
        ("main.c", "int main(void) { return 0; }"),
    ]);
    let invoker = Arc::new(RecordingInvoker::new());
    let handler = Arc::new(Collecting::default());

    orchestrator(&invoker)
        .with_progress_handler(handler.clone())
        .run(
            BuildRequest::new(dir.path().join("main.side")),
            CancellationToken::new(),
        )
        .await;

    let events = handler.events.lock().unwrap();
    assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
    let phases: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseStarted { phase } => Some(phase.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec!["planning", "compiling", "linking", "post-link"]);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::Completed { exit_code: 0, .. })
    ));
}
