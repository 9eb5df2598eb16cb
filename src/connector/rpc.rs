//! Remote procedure calls over queues
//!
//! A request is an envelope whose `funcname` names a function registered on
//! the worker and whose payload is `{"args": [...], "kwargs": {...}}`. The
//! answer travels back on the request's one-shot return address, flagged as
//! an exception when the function failed.

use serde_json::{json, Map, Value};

use super::queue::{Connector, Wait};
use super::Envelope;
use crate::error::{CourierError, Result};

/// Outcome of a registered function
pub type HandlerResult = std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>>;

/// A function served by [`Connector::worker`]
pub type Handler = Box<dyn Fn(&[Value], &Map<String, Value>) -> HandlerResult + Send + Sync>;

/// Poll interval of the worker loop
const WORKER_WAIT: Wait = Wait::Seconds(1);

/// Positional and keyword arguments of one call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Request payload
    fn into_value(self) -> Value {
        json!({ "args": self.args, "kwargs": self.kwargs })
    }

    /// Read the arguments out of a request payload; missing parts are empty
    fn from_value(value: &Value) -> Self {
        let args = match value.get("args") {
            Some(Value::Array(args)) => args.clone(),
            _ => Vec::new(),
        };
        let kwargs = match value.get("kwargs") {
            Some(Value::Object(kwargs)) => kwargs.clone(),
            _ => Map::new(),
        };
        Self { args, kwargs }
    }
}

impl Connector {
    /// Call `funcname` on the worker listening at `dst`
    ///
    /// Waits for the answer with the connector timeout. No answer in time is
    /// [`CourierError::Timeout`]; an exception answer is
    /// [`CourierError::RemoteExecution`].
    pub fn run(
        &mut self,
        dst: &str,
        funcname: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value> {
        self.call(dst, funcname, CallArgs { args, kwargs })
    }

    /// [`Connector::run`] with bundled arguments
    pub fn call(&mut self, dst: &str, funcname: &str, args: CallArgs) -> Result<Value> {
        let wait = self.timeout;
        tracing::debug!("Calling {} on {}", funcname, dst);

        let Some(answer) = self.send_receive(dst, args.into_value(), wait, Some(funcname))? else {
            tracing::warn!("No answer from {} for {} within {:?}", dst, funcname, wait);
            return Err(CourierError::Timeout);
        };
        if answer.srcack().is_some() {
            self.release(&answer)?;
        }

        if answer.is_exception() {
            return Err(CourierError::RemoteExecution(describe(answer.val())));
        }
        Ok(answer.val().clone())
    }

    /// Serve registered functions until `is_running` returns false
    ///
    /// The flag is checked once per receive wait. A failing function is
    /// answered with an exception reply and then ends the loop with
    /// [`CourierError::Handler`]; an unknown function name is answered and
    /// the loop continues.
    pub fn worker<F>(&mut self, mut is_running: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        tracing::info!("Worker {} serving {:?}", self.name, self.functions());

        while is_running() {
            if let Some(request) = self.receive(WORKER_WAIT)? {
                self.serve(&request)?;
            }
        }

        tracing::info!("Worker {} stopped", self.name);
        Ok(())
    }

    /// Answer a single request
    pub fn serve(&mut self, request: &Envelope) -> Result<()> {
        let funcname = request.funcname().unwrap_or_default().to_string();

        let outcome = self.functions.get(&funcname).map(|function| {
            let call = CallArgs::from_value(request.val());
            function(call.args.as_slice(), &call.kwargs)
        });
        let Some(outcome) = outcome else {
            tracing::warn!("Request from {} for unknown function {:?}", request.src(), funcname);
            let message = format!("No such function name {}", funcname);
            self.reply(request, Value::from(message), true, true)?;
            return Ok(());
        };

        match outcome {
            Ok(value) => {
                self.reply(request, value, true, false)?;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!("{} failed: {}", funcname, message);
                self.reply(request, Value::from(message.clone()), true, true)?;
                Err(CourierError::Handler { funcname, message })
            }
        }
    }

    /// Callable view of a remote worker
    pub fn proxy(&mut self, dst: impl Into<String>) -> Proxy<'_> {
        Proxy {
            connector: self,
            dst: dst.into(),
        }
    }
}

/// Text of an exception payload
fn describe(value: &Value) -> String {
    match value {
        Value::String(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Remote worker bound to a destination queue
///
/// Obtained from [`Connector::proxy`].
pub struct Proxy<'a> {
    connector: &'a mut Connector,
    dst: String,
}

impl Proxy<'_> {
    pub fn dst(&self) -> &str {
        &self.dst
    }

    /// Call `method` with positional arguments
    pub fn call(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.connector.run(&self.dst, method, args, Map::new())
    }

    /// Call `method` with positional and keyword arguments
    pub fn call_with(&mut self, method: &str, args: CallArgs) -> Result<Value> {
        self.connector.call(&self.dst, method, args)
    }
}
