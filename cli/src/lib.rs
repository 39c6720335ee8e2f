// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stdio MCP server library surface - exposes the tool dispatch so it can
//! be exercised from tests without going through stdin/stdout.

pub mod tools;
