//! Application assembly and the per-request dispatcher.
//!
//! An [`App`] collects middleware, routes, and collaborator configuration,
//! then [`App::build`] freezes it into a [`Dispatcher`]: the middleware
//! chain is composed exactly once around the terminal handler and reused,
//! immutable, by every concurrent request. The dispatcher drives one
//! request end to end: fresh context and buffered writer in, composed
//! chain through, atomic commit out.
//!
//! # Examples
//!
//! ```rust,no_run
//! use strand::app::App;
//! use strand::logger::Logger;
//!
//! let mut app = App::new(Logger::stderr());
//! app.get("/hello/:name", |ctx| async move {
//!     let name = ctx.param("name").unwrap_or_default();
//!     ctx.write(format!("hello, {}", name).as_bytes());
//!     ctx.ok()
//! });
//! app.listen("127.0.0.1:3000").unwrap();
//! ```

use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use crate::http::{Body, BufferedResponse, Method, Request, ResponseWriter};
use crate::logger::Logger;
use crate::middleware::{chain, AccessLog, Handler, Middleware, Recover};
use crate::router::{PathRouter, Router};
use crate::static_files::StaticFiles;
use crate::status::Status;
use crate::template::Templates;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader,
};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

pub struct App {
    pub max_connections: usize,
    router: Box<dyn Router>,
    middlewares: Vec<Arc<dyn Middleware>>,
    templates_dir: Option<PathBuf>,
    assets: Option<StaticFiles>,
    logger: Logger,
}

impl App {
    /// Creates an application with the access logger and panic recovery
    /// pre-registered, in that order: the access logger observes every
    /// request outermost, and recovery converts panics from everything
    /// registered after it into definite 500 outcomes before the logger's
    /// return path runs.
    pub fn new(logger: Logger) -> Self {
        let mut app = Self {
            max_connections: 256,
            router: Box::new(PathRouter::new()),
            middlewares: Vec::new(),
            templates_dir: None,
            assets: None,
            logger: logger.clone(),
        };
        app.use_middleware(AccessLog::new(logger.clone()));
        app.use_middleware(Recover::new(logger));
        app
    }

    /// Swaps in a routing implementation other than the default
    /// [`PathRouter`].
    pub fn with_router(mut self, router: Box<dyn Router>) -> Self {
        self.router = router;
        self
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.max_connections = max_connections;
        self
    }

    /// Adds a middleware. Registration order is execution order on entry;
    /// first registered wraps outermost.
    pub fn use_middleware(&mut self, middleware: impl Middleware + 'static) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn route<F, Fut>(&mut self, method: Method, path: &str, handler: F)
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Status> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx| Box::pin(handler(ctx)));
        self.router.route(method, path, handler);
    }

    /// Registers a GET route handler
    pub fn get<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Status> + Send + 'static,
    {
        self.route(Method::GET, path, handler);
    }

    /// Registers a POST route handler
    pub fn post<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Status> + Send + 'static,
    {
        self.route(Method::POST, path, handler);
    }

    /// Registers a PUT route handler
    pub fn put<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Status> + Send + 'static,
    {
        self.route(Method::PUT, path, handler);
    }

    /// Registers a PATCH route handler
    pub fn patch<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Status> + Send + 'static,
    {
        self.route(Method::PATCH, path, handler);
    }

    /// Registers a DELETE route handler
    pub fn delete<F, Fut>(&mut self, path: &str, handler: F)
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Status> + Send + 'static,
    {
        self.route(Method::DELETE, path, handler);
    }

    /// Sets the template directory; compilation happens in [`App::build`].
    pub fn templates_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.templates_dir = Some(dir.into());
        self
    }

    /// Serves files from `dir` for GET requests under `prefix` that no
    /// route matched.
    pub fn static_dir(&mut self, dir: impl Into<PathBuf>, prefix: &str) -> &mut Self {
        self.assets = Some(StaticFiles::new(dir, prefix, self.logger.clone()));
        self
    }

    /// Freezes the application into a dispatcher: compiles templates and
    /// composes the middleware chain once.
    pub fn build(self) -> ServerResult<Dispatcher> {
        let templates = match &self.templates_dir {
            Some(dir) => Some(Arc::new(Templates::compile_with(dir, self.assets.clone())?)),
            None => None,
        };

        let router: Arc<dyn Router> = Arc::from(self.router);
        let assets = self.assets;
        let endpoint: Handler = Arc::new(move |ctx: Arc<Context>| {
            let router = router.clone();
            let assets = assets.clone();
            Box::pin(async move {
                let method = ctx.request().method;
                let path = ctx.request().path.clone();

                if let Some((handler, params)) = router.find(method, &path) {
                    ctx.set_params(params);
                    return handler(ctx).await;
                }

                if method == Method::GET {
                    if let Some(assets) = &assets {
                        if assets.serves(&path) {
                            return assets.serve(&ctx);
                        }
                    }
                }

                ctx.not_found()
            })
        });

        Ok(Dispatcher {
            chain: chain(&self.middlewares, endpoint),
            templates,
            logger: self.logger,
            max_connections: self.max_connections,
        })
    }

    /// Builds the dispatcher and serves connections on `addr` until the
    /// process exits.
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(async move {
            let dispatcher = Arc::new(self.build()?);
            let listener = TcpListener::bind(addr).await?;
            let connection_counter = Arc::new(AtomicUsize::new(0));

            dispatcher.logger.info(&format!("listening on http://{}", addr));

            loop {
                let counter = Arc::clone(&connection_counter);
                if counter.load(Ordering::Relaxed) >= dispatcher.max_connections {
                    tokio::task::yield_now().await;
                    continue;
                }

                match listener.accept().await {
                    Ok((stream, peer)) => {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let dispatcher = Arc::clone(&dispatcher);

                        tokio::spawn(async move {
                            let result = dispatcher
                                .handle_connection(stream, peer.to_string())
                                .await;
                            if let Err(err) = result {
                                dispatcher.logger.error(
                                    Some(&ServerError::because(err, "connection error")),
                                    "connection error",
                                );
                            }
                            counter.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(err) => dispatcher.logger.error(
                        Some(&ServerError::because(err, "failed to accept connection")),
                        "failed to accept connection",
                    ),
                }
            }
        })
    }
}

/// The per-request driver. Holds the composed chain and the shared
/// collaborators; everything per-request is created fresh in
/// [`Dispatcher::dispatch`].
pub struct Dispatcher {
    chain: Handler,
    templates: Option<Arc<Templates>>,
    logger: Logger,
    max_connections: usize,
}

impl Dispatcher {
    /// Drives one request through the chain and commits the buffered
    /// response. A commit failure is logged, not surfaced: the client
    /// connection is likely already gone.
    pub async fn dispatch<S>(&self, request: Request, stream: &mut S)
    where
        S: AsyncWrite + Unpin,
    {
        let response = Arc::new(BufferedResponse::new());
        let context = Arc::new(Context::new(
            response.clone(),
            request,
            self.templates.clone(),
            self.logger.clone(),
        ));

        let status = (self.chain)(context.clone()).await;
        if status.code != 0 {
            response.write_header(status.code);
        }

        if let Err(err) = response.send(stream).await {
            let error = ServerError::because(
                err,
                format!("error while flushing response: {}", context.url()),
            );
            self.logger.error(Some(&error), error.message());
        }
    }

    /// Reads one request off the connection and dispatches it.
    pub async fn handle_connection<S>(&self, mut stream: S, remote_addr: String) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = {
            let reader = BufReader::new(&mut stream);
            match read_request(reader, remote_addr).await? {
                Some(request) => request,
                None => return Ok(()),
            }
        };

        self.dispatch(request, &mut stream).await;
        Ok(())
    }
}

async fn read_request<R>(mut reader: R, remote_addr: String) -> std::io::Result<Option<Request>>
where
    R: AsyncBufRead + Unpin,
{
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    if request_line.trim().is_empty() {
        return Ok(None);
    }

    // Parse the request line
    let mut parts = request_line.trim().split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "invalid request line"))?
        .to_string();
    let full_path = parts
        .next()
        .ok_or_else(|| Error::new(ErrorKind::InvalidData, "invalid request line"))?;

    // Split path and query
    let mut path_parts = full_path.split('?');
    let path = path_parts.next().unwrap_or("/").to_string();
    let path = path.trim_end_matches('/').to_string();
    let path = if path.is_empty() { "/".to_string() } else { path };
    let query_string = path_parts.next().unwrap_or("").to_string();
    let query = parse_query(&query_string);

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;

        if line.trim().is_empty() {
            break;
        }

        if let Some((key, value)) = line.trim().split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }

    // Read body if Content-Length is present
    let mut body = Vec::new();
    let content_type = headers.get("content-type").cloned().unwrap_or_default();
    if let Some(content_length) = headers.get("content-length") {
        if let Ok(length) = content_length.parse::<usize>() {
            body.reserve(length);
            let mut take = reader.take(length as u64);
            take.read_to_end(&mut body).await?;
        }
    }

    Ok(Some(Request {
        method: Method::from_string(&method),
        path,
        query_string,
        query,
        headers,
        body: Body::from_bytes(&content_type, body),
        remote_addr,
    }))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((
                urlencoding::decode(key).ok()?.into_owned(),
                urlencoding::decode(value).ok()?.into_owned(),
            ))
        })
        .collect()
}
