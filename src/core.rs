use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::config::ShellConfig;
use crate::error::{ShellError, ShellResult};
use crate::heap::{Heap, HeapStats};
use crate::vm::{assemble, Builtins, Program, Vm};

/// One reusable execution core: a heap and the runtime instance bound to
/// it, running one task at a time.
///
/// Cores are expensive to create, so the shell builds them once at
/// startup and the scheduler hands them from task to task. A core is
/// never shared between two concurrently running tasks; reuse is
/// strictly sequential.
#[derive(Debug)]
pub struct ShellCore {
    id: usize,
    // Dropped ahead of the heap during teardown; only `drop` takes it.
    runtime: Option<Builtins>,
    heap: Heap,
    trace: bool,
    tasks_run: usize,
}

impl ShellCore {
    /// Builds the heap and the runtime instance bound to it. A failure
    /// here is fatal to the whole run; the caller exits before any work
    /// starts.
    pub fn create(config: &ShellConfig, id: usize) -> ShellResult<Self> {
        let heap = Heap::new(id, config.heap.clone())?;
        let runtime = {
            let _scope = heap.enter();
            Builtins::standard()
        };
        debug!(core = id, "core created");
        Ok(Self {
            id,
            runtime: Some(runtime),
            heap,
            trace: config.trace,
            tasks_run: 0,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tasks_run(&self) -> usize {
        self.tasks_run
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.heap.stats()
    }

    /// Runs one task to completion on the calling thread and returns its
    /// exit code. The whole execution happens inside a heap-entered
    /// scope so the collector can identify the active thread.
    pub fn run(&mut self, task: &Path) -> i32 {
        self.tasks_run += 1;
        let _scope = self.heap.enter();
        match self.run_inner(task) {
            Ok(()) => 0,
            Err(ShellError::Exit(code)) => code,
            Err(err) => {
                warn!(core = self.id, task = %task.display(), %err, "task failed");
                1
            }
        }
    }

    fn run_inner(&self, task: &Path) -> ShellResult<()> {
        let program = load_program(task)?;
        let builtins = self
            .runtime
            .as_ref()
            .ok_or_else(|| ShellError::runtime("core runtime already torn down"))?;
        Vm::new(&program, &self.heap, builtins, self.trace).execute()?;
        Ok(())
    }

    /// Evaluates an in-memory assembly snippet (REPL path).
    pub fn eval_source(&self, source: &str) -> ShellResult<crate::vm::Value> {
        let program = assemble(source)?;
        let builtins = self
            .runtime
            .as_ref()
            .ok_or_else(|| ShellError::runtime("core runtime already torn down"))?;
        let _scope = self.heap.enter();
        Vm::new(&program, &self.heap, builtins, self.trace).execute()
    }
}

impl Drop for ShellCore {
    fn drop(&mut self) {
        // The runtime instance goes first, inside its own heap-entered
        // scope; the heap outlives everything it manages.
        let _scope = self.heap.enter();
        self.runtime.take();
        debug!(core = self.id, tasks = self.tasks_run, "core destroyed");
    }
}

/// Loads a task: binary bytecode if the magic matches, otherwise the file
/// is assembled as Cinder textual assembly.
pub fn load_program(path: &Path) -> ShellResult<Program> {
    let bytes = fs::read(path).map_err(|source| ShellError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match Program::decode(bytes.as_slice()) {
        Ok(program) => Ok(program),
        Err(ShellError::InvalidMagic) => {
            let source = String::from_utf8(bytes).map_err(|_| {
                ShellError::Bytecode("input is neither Cinder bytecode nor UTF-8 assembly".into())
            })?;
            assemble(&source)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const RETURN_7: &str = r#"
        .constants
            int 7
            string "exit"
        .end
        .function main 0 0
            load_const 0
            call_builtin 1 1
            return
        .end
    "#;

    fn write_script(dir: &tempfile::TempDir, name: &str, source: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = fs::File::create(&path).expect("create script");
        file.write_all(source.as_bytes()).expect("write script");
        path
    }

    #[test]
    fn runs_assembly_task_and_reports_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let task = write_script(&dir, "seven.cna", RETURN_7);
        let mut core = ShellCore::create(&ShellConfig::default(), 0).expect("core");
        assert_eq!(core.run(&task), 7);
        assert_eq!(core.tasks_run(), 1);
    }

    #[test]
    fn runs_binary_bytecode_task() {
        let dir = tempfile::tempdir().expect("tempdir");
        let program = assemble(RETURN_7).expect("assemble");
        let path = dir.path().join("seven.cnb");
        fs::write(&path, program.to_bytes().expect("encode")).expect("write");
        let mut core = ShellCore::create(&ShellConfig::default(), 0).expect("core");
        assert_eq!(core.run(&path), 7);
    }

    #[test]
    fn missing_task_maps_to_exit_code_one() {
        let mut core = ShellCore::create(&ShellConfig::default(), 0).expect("core");
        assert_eq!(core.run(Path::new("/nonexistent/task.cna")), 1);
    }

    #[test]
    fn core_is_reusable_across_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let task = write_script(&dir, "seven.cna", RETURN_7);
        let mut core = ShellCore::create(&ShellConfig::default(), 0).expect("core");
        for _ in 0..3 {
            assert_eq!(core.run(&task), 7);
        }
        assert_eq!(core.tasks_run(), 3);
    }
}
