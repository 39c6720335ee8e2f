// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Sandbox preload / network rewiring (C4).
//!
//! This module owns the in-sandbox shim script that both execution backends
//! inject ahead of user code. It never runs inside this process — it is
//! written to disk next to the user's code file and loaded by the child
//! interpreter (`--preload` in subprocess mode, baked into the code mount in
//! container mode) before the user's script executes.
//!
//! The shim replaces the global `fetch` with a wrapper that serializes
//! whatever argument shape it received into `{url, method, headers, body}`,
//! POSTs that envelope to `PROXY_URL` + `/proxy`, and either reconstructs a
//! `Response`-shaped object from a 200 or throws a structured error whose
//! first stdout/stderr line is the denial JSON (spec §4.4).

/// Marker the execution backends scan for on a denied run's stderr. Must
/// match the prefix the shim emits before the JSON payload.
pub const DENIAL_MARKER: &str = "PERMISSION_DENIED";

/// The shim source. Deliberately plain JS (no bundler, no TypeScript) since
/// it is injected ahead of user code in both a bare interpreter preload and
/// a container exec — it must run with zero additional tooling.
pub const SHIM_SOURCE: &str = r#"
(() => {
  if (globalThis.__aegis_fetch_shimmed__) return;
  globalThis.__aegis_fetch_shimmed__ = true;

  const PROXY_URL = (globalThis.process && globalThis.process.env && globalThis.process.env.PROXY_URL) || "http://127.0.0.1:9999";
  const originalFetch = globalThis.fetch;

  function normalizeRequest(input, init) {
    let url, method, headers, body;
    if (typeof input === "string") {
      url = input;
    } else if (input instanceof URL) {
      url = input.toString();
    } else if (input && typeof input === "object" && "url" in input) {
      url = input.url;
      method = input.method;
      headers = input.headers;
      body = input.body;
    } else {
      throw new TypeError("unsupported fetch input shape");
    }

    method = ((init && init.method) || method || "GET").toUpperCase();

    const flatHeaders = {};
    const srcHeaders = (init && init.headers) || headers;
    if (srcHeaders) {
      if (typeof srcHeaders.forEach === "function") {
        srcHeaders.forEach((value, key) => { flatHeaders[key] = value; });
      } else {
        for (const key of Object.keys(srcHeaders)) flatHeaders[key] = srcHeaders[key];
      }
    }

    let textBody = (init && init.body) || body;
    if (textBody !== undefined && textBody !== null && typeof textBody !== "string") {
      if (textBody instanceof ArrayBuffer || ArrayBuffer.isView(textBody)) {
        try {
          textBody = Buffer.from(textBody).toString("utf8");
        } catch (_err) {
          throw new TypeError("request body could not be represented as text");
        }
      } else {
        textBody = JSON.stringify(textBody);
      }
    }

    return { url, method, headers: flatHeaders, body: textBody };
  }

  function buildResponse(status, statusText, headers, bodyText) {
    let consumed = false;
    const headerMap = new Map(Object.entries(headers || {}).map(([k, v]) => [k.toLowerCase(), v]));
    return {
      status,
      statusText,
      ok: status >= 200 && status < 300,
      headers: {
        get: (name) => headerMap.get(String(name).toLowerCase()) ?? null,
        has: (name) => headerMap.has(String(name).toLowerCase()),
      },
      text: async () => {
        if (consumed) throw new TypeError("body already consumed");
        consumed = true;
        return bodyText ?? "";
      },
      json: async () => {
        if (consumed) throw new TypeError("body already consumed");
        consumed = true;
        return JSON.parse(bodyText ?? "null");
      },
    };
  }

  globalThis.fetch = async function shimmedFetch(input, init) {
    const normalized = normalizeRequest(input, init);

    const proxyResponse = await originalFetch(`${PROXY_URL}/proxy`, {
      method: "POST",
      headers: { "content-type": "application/json" },
      body: JSON.stringify(normalized),
    });

    if (proxyResponse.status === 403) {
      const denial = await proxyResponse.json();
      const line = JSON.stringify(denial);
      const err = new Error(`permission denied: ${denial.requiredPermission?.description ?? "unknown"}`);
      err.toString = () => `${PERMISSION_DENIED_MARKER} ${line}`;
      console.error(`${PERMISSION_DENIED_MARKER} ${line}`);
      throw err;
    }

    if (proxyResponse.status === 502) {
      const failure = await proxyResponse.json();
      throw new Error(failure.message || "network error");
    }

    const envelope = await proxyResponse.json();
    return buildResponse(envelope.status, envelope.statusText, envelope.headers, envelope.body);
  };
})();
"#;

/// Renders the shim with its denial marker substituted in. Kept as a
/// function rather than a `const` format so the marker constant stays the
/// single source of truth shared with the execution backends' stderr scan.
pub fn render_shim() -> String {
    SHIM_SOURCE.replace("PERMISSION_DENIED_MARKER", DENIAL_MARKER)
}
