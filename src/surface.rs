//! Isolated execution surfaces and the one-way message channel back to the host.
//!
//! A surface loads a composed document and runs its scripts in a global scope
//! of its own. The only thing that leaves the surface is a [`SurfaceMessage`]
//! on the channel handed to it at construction: posted data (what the page
//! passed to `parent.postMessage`), navigation requests (`window.open`) and a
//! `Loaded` signal once a document has finished running.

use std::fmt;

use tokio::sync::mpsc;

use crate::Result;

/// Which of the two preview surfaces a message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceId {
    Demo,
    Code,
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceId::Demo => f.write_str("demo"),
            SurfaceId::Code => f.write_str("code"),
        }
    }
}

/// Message from a surface to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceMessage {
    /// JSON text of a value the page posted to its parent
    Posted { surface: SurfaceId, data: String },
    /// The page asked to open `url` in a new top-level context
    Navigate { surface: SurfaceId, url: String },
    /// Document `load_id` finished running
    Loaded { surface: SurfaceId, load_id: u64 },
}

impl SurfaceMessage {
    pub fn surface(&self) -> SurfaceId {
        match self {
            SurfaceMessage::Posted { surface, .. }
            | SurfaceMessage::Navigate { surface, .. }
            | SurfaceMessage::Loaded { surface, .. } => *surface,
        }
    }
}

pub type MessageSender = mpsc::UnboundedSender<SurfaceMessage>;
pub type MessageReceiver = mpsc::UnboundedReceiver<SurfaceMessage>;

/// Create the process-wide surface → host channel
pub fn message_channel() -> (MessageSender, MessageReceiver) {
    mpsc::unbounded_channel()
}

/// A rendering context that runs documents apart from host state
pub trait ExecutionSurface: Send {
    fn id(&self) -> SurfaceId;

    /// Queue `document` for loading and return its load id. Completion is
    /// reported later as [`SurfaceMessage::Loaded`]; earlier loads are not
    /// cancelled.
    fn load(&mut self, document: &str) -> Result<u64>;
}

#[cfg(feature = "sandbox")]
pub use sandbox::BoaSurface;

#[cfg(feature = "sandbox")]
mod sandbox {
    use std::cell::RefCell;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::thread::JoinHandle;

    use boa_engine::native_function::NativeFunctionPointer;
    use boa_engine::{Context, JsError, JsResult, JsString, JsValue, NativeFunction, Source};
    use log::{debug, info, warn};
    use scraper::{ElementRef, Html, Selector};

    use super::{ExecutionSurface, MessageSender, SurfaceId, SurfaceMessage};
    use crate::compose::fill_template;
    use crate::{Error, PlaygroundConfig, Result};

    /// Reported as the `filename` of uncaught errors
    const DOCUMENT_FILENAME: &str = "about:srcdoc";

    thread_local! {
        static OUTBOX: RefCell<Option<(SurfaceId, MessageSender)>> = const { RefCell::new(None) };
    }

    struct LoadJob {
        load_id: u64,
        document: String,
    }

    #[derive(Debug, Clone, Copy)]
    struct SandboxLimits {
        loop_iteration_limit: u64,
        recursion_limit: usize,
        max_timer_callbacks: usize,
    }

    /// Surface backed by the Boa engine on a dedicated worker thread.
    ///
    /// Every load gets a brand-new `Context`, so nothing a document defines
    /// survives into the next load, and an exception in user code can only
    /// surface as a message on the channel.
    pub struct BoaSurface {
        id: SurfaceId,
        next_load: u64,
        job_tx: Option<Sender<LoadJob>>,
        worker: Option<JoinHandle<()>>,
    }

    impl BoaSurface {
        pub fn spawn(id: SurfaceId, config: &PlaygroundConfig, outbox: MessageSender) -> Result<Self> {
            let limits = SandboxLimits {
                loop_iteration_limit: config.script_loop_iteration_limit,
                recursion_limit: config.script_recursion_limit,
                max_timer_callbacks: config.max_timer_callbacks,
            };
            let (job_tx, job_rx) = mpsc::channel::<LoadJob>();
            let worker = std::thread::Builder::new()
                .name(format!("rtc-surface-{}", id))
                .spawn(move || run_worker(id, limits, outbox, job_rx))
                .map_err(|e| Error::InitializationError(format!("Failed to spawn {} surface worker: {}", id, e)))?;

            Ok(Self {
                id,
                next_load: 0,
                job_tx: Some(job_tx),
                worker: Some(worker),
            })
        }

        /// Stop accepting documents and wait for the worker to finish the
        /// load it is running.
        pub fn close(mut self) -> Result<()> {
            self.job_tx.take();
            if let Some(handle) = self.worker.take() {
                handle
                    .join()
                    .map_err(|_| Error::Other(format!("{} surface worker panicked", self.id)))?;
            }
            Ok(())
        }
    }

    impl ExecutionSurface for BoaSurface {
        fn id(&self) -> SurfaceId {
            self.id
        }

        fn load(&mut self, document: &str) -> Result<u64> {
            let tx = self
                .job_tx
                .as_ref()
                .ok_or_else(|| Error::LoadError(format!("{} surface is closed", self.id)))?;
            self.next_load += 1;
            let job = LoadJob {
                load_id: self.next_load,
                document: document.to_string(),
            };
            tx.send(job)
                .map_err(|e| Error::LoadError(format!("{} surface worker is gone: {}", self.id, e)))?;
            Ok(self.next_load)
        }
    }

    fn run_worker(id: SurfaceId, limits: SandboxLimits, outbox: MessageSender, jobs: Receiver<LoadJob>) {
        OUTBOX.with(|o| *o.borrow_mut() = Some((id, outbox.clone())));

        while let Ok(job) = jobs.recv() {
            debug!("{} surface: loading document #{}", id, job.load_id);
            if let Err(e) = execute_document(&job.document, limits) {
                warn!("{} surface: document #{} failed to start: {}", id, job.load_id, e);
            }
            if outbox
                .send(SurfaceMessage::Loaded { surface: id, load_id: job.load_id })
                .is_err()
            {
                // Host dropped the receiver; nobody is listening any more.
                break;
            }
        }

        OUTBOX.with(|o| o.borrow_mut().take());
    }

    fn execute_document(document: &str, limits: SandboxLimits) -> Result<()> {
        let html = Html::parse_document(document);
        let scripts = extract_scripts(&html)?;

        let mut ctx: Context = Context::default();
        if limits.loop_iteration_limit > 0 {
            ctx.runtime_limits_mut().set_loop_iteration_limit(limits.loop_iteration_limit);
        }
        if limits.recursion_limit < usize::MAX {
            ctx.runtime_limits_mut().set_recursion_limit(limits.recursion_limit);
        }
        install_host(&mut ctx, &html)?;

        for script in &scripts {
            if let Err(err) = ctx.eval(Source::from_bytes(script.as_bytes())) {
                report_uncaught(&mut ctx, &err);
            }
        }

        for _ in 0..limits.max_timer_callbacks {
            match ctx.eval(Source::from_bytes("__rtc_run_next_timer()".as_bytes())) {
                Ok(more) if more.as_boolean() == Some(false) => break,
                Ok(_) => {}
                Err(err) => report_uncaught(&mut ctx, &err),
            }
        }

        Ok(())
    }

    /// Inline classic scripts in document order; external and non-JS
    /// scripts are skipped.
    fn extract_scripts(html: &Html) -> Result<Vec<String>> {
        let selector = Selector::parse("script")
            .map_err(|e| Error::LoadError(format!("Invalid script selector: {:?}", e)))?;

        let mut scripts = Vec::new();
        for el in html.select(&selector) {
            if let Some(src) = el.value().attr("src") {
                debug!("skipping external script {}", src);
                continue;
            }
            let runnable = match el.value().attr("type").map(|t| t.trim().to_ascii_lowercase()) {
                None => true,
                Some(t) => t.is_empty() || t.contains("javascript") || t == "text/ecmascript",
            };
            if runnable {
                scripts.push(el.text().collect::<String>());
            }
        }
        Ok(scripts)
    }

    /// Flatten the parsed document into element records in document order.
    /// `parent` is the index of the parent record, null for the root.
    fn dom_elements(html: &Html) -> String {
        let mut elements = Vec::new();
        let mut stack: Vec<(ElementRef, Option<usize>)> = vec![(html.root_element(), None)];
        while let Some((node, parent)) = stack.pop() {
            let value = node.value();
            let attrs = value
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<Vec<_>>();

            let idx = elements.len();
            elements.push(serde_json::json!({
                "tag": value.name(),
                "text": node.text().collect::<String>(),
                "html": node.inner_html(),
                "attributes": attrs,
                "parent": parent,
            }));

            // Reverse so the pops come out in document order.
            let children: Vec<_> = node.children().filter_map(ElementRef::wrap).collect();
            for child in children.into_iter().rev() {
                stack.push((child, Some(idx)));
            }
        }
        serde_json::to_string(&elements).unwrap_or_else(|_| "[]".to_string())
    }

    fn document_title(html: &Html) -> String {
        Selector::parse("title")
            .ok()
            .and_then(|sel| html.select(&sel).next().map(|t| t.text().collect::<String>()))
            .unwrap_or_default()
    }

    fn install_host(ctx: &mut Context, html: &Html) -> Result<()> {
        let natives: [(&str, usize, NativeFunctionPointer); 3] = [
            ("__rtc_post", 1, host_post),
            ("__rtc_open", 2, host_open),
            ("__rtc_console", 2, host_console),
        ];
        for (name, length, ptr) in natives {
            ctx.register_global_builtin_callable(
                JsString::from(name),
                length,
                NativeFunction::from_fn_ptr(ptr),
            )
            .map_err(|e| Error::ScriptError(format!("Failed to register {}: {}", name, e)))?;
        }

        let elements = dom_elements(html);
        let title = js_literal(&document_title(html));
        let filename = js_literal(DOCUMENT_FILENAME);
        let harness = fill_template(
            include_str!("surface_harness.js"),
            &[
                ("{{ELEMENTS}}", elements.as_str()),
                ("{{TITLE}}", title.as_str()),
                ("{{FILENAME}}", filename.as_str()),
            ],
        );
        ctx.eval(Source::from_bytes(harness.as_bytes()))
            .map_err(|e| Error::ScriptError(format!("Harness failed: {}", e)))?;
        Ok(())
    }

    // Fires the page's window `error` listeners, like a browser would for an
    // exception nobody caught.
    fn report_uncaught(ctx: &mut Context, err: &JsError) {
        let message = match err.try_native(ctx) {
            Ok(native) => format!("Uncaught {}", native),
            Err(_) => format!("Uncaught {}", err),
        };
        debug!("uncaught error in preview: {}", message);

        let call = format!(
            "__rtc_dispatch_error({}, {})",
            js_literal(&message),
            js_literal(DOCUMENT_FILENAME)
        );
        if let Err(e) = ctx.eval(Source::from_bytes(call.as_bytes())) {
            warn!("failed to dispatch error event: {}", e);
        }
    }

    fn js_literal(s: &str) -> String {
        serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
    }

    fn arg_string(args: &[JsValue], idx: usize, ctx: &mut Context) -> JsResult<String> {
        match args.get(idx) {
            Some(v) => Ok(v.to_string(ctx)?.to_std_string_escaped()),
            None => Ok(String::new()),
        }
    }

    fn send(message: SurfaceMessage) {
        OUTBOX.with(|o| {
            if let Some((_, tx)) = o.borrow().as_ref() {
                let _ = tx.send(message);
            }
        });
    }

    fn current_surface() -> Option<SurfaceId> {
        OUTBOX.with(|o| o.borrow().as_ref().map(|(id, _)| *id))
    }

    fn host_post(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
        let data = arg_string(args, 0, ctx)?;
        if let Some(surface) = current_surface() {
            send(SurfaceMessage::Posted { surface, data });
        }
        Ok(JsValue::undefined())
    }

    fn host_open(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
        let target = arg_string(args, 0, ctx)?;
        match url::Url::parse(&target) {
            Ok(url) => {
                if let Some(surface) = current_surface() {
                    send(SurfaceMessage::Navigate { surface, url: url.to_string() });
                }
            }
            Err(e) => debug!("ignoring window.open({:?}): {}", target, e),
        }
        Ok(JsValue::undefined())
    }

    fn host_console(_this: &JsValue, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
        let level = arg_string(args, 0, ctx)?;
        let text = arg_string(args, 1, ctx)?;
        match level.as_str() {
            "error" | "warn" => warn!(target: "runthatcode::preview", "console.{}: {}", level, text),
            "debug" => debug!(target: "runthatcode::preview", "{}", text),
            _ => info!(target: "runthatcode::preview", "{}", text),
        }
        Ok(JsValue::undefined())
    }

}
