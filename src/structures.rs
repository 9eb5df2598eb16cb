//! Thin typed views over single store keys.

use bytes::Bytes;

use crate::client::Client;
use crate::error::Result;
use crate::protocol::{Reply, ToArg};

/// A string value stored under one key
pub struct StringKey<'a> {
    client: &'a mut Client,
    name: String,
}

impl<'a> StringKey<'a> {
    pub fn new(client: &'a mut Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&mut self) -> Result<Option<Bytes>> {
        self.client.get(&self.name)
    }

    pub fn set<V: ToArg + ?Sized>(&mut self, value: &V) -> Result<()> {
        self.client.set(&self.name, value)
    }
}

/// An integer counter
///
/// Iterating yields successive increments.
pub struct Counter<'a> {
    client: &'a mut Client,
    name: String,
}

impl<'a> Counter<'a> {
    /// Bind to a counter, resetting it to `seed` when given
    pub fn new(client: &'a mut Client, name: impl Into<String>, seed: Option<i64>) -> Result<Self> {
        let name = name.into();
        if let Some(seed) = seed {
            client.set(&name, &seed)?;
        }
        Ok(Self { client, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value; a missing key reads as 0
    pub fn get(&mut self) -> Result<i64> {
        match self.client.get(&self.name)? {
            Some(raw) => Reply::Bulk(raw).into_integer(),
            None => Ok(0),
        }
    }

    pub fn incr(&mut self) -> Result<i64> {
        self.client.incr(&self.name)
    }
}

impl Iterator for Counter<'_> {
    type Item = Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.incr())
    }
}

/// A field map stored under one key
pub struct HashKey<'a> {
    client: &'a mut Client,
    name: String,
}

impl<'a> HashKey<'a> {
    pub fn new(client: &'a mut Client, name: impl Into<String>) -> Self {
        Self {
            client,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get<F: ToArg + ?Sized>(&mut self, field: &F) -> Result<Option<Bytes>> {
        self.client.hget(&self.name, field)
    }

    pub fn set<F: ToArg + ?Sized, V: ToArg + ?Sized>(&mut self, field: &F, value: &V) -> Result<()> {
        self.client.hset(&self.name, field, value).map(|_| ())
    }

    /// Remove a field, returning whether it existed
    pub fn remove<F: ToArg + ?Sized>(&mut self, field: &F) -> Result<bool> {
        Ok(self.client.hdel(&self.name, field)? > 0)
    }

    pub fn keys(&mut self) -> Result<Vec<Bytes>> {
        self.client.hkeys(&self.name)
    }

    pub fn values(&mut self) -> Result<Vec<Bytes>> {
        self.client.hvals(&self.name)
    }

    pub fn items(&mut self) -> Result<Vec<(Bytes, Bytes)>> {
        self.client.hgetall(&self.name)
    }
}
