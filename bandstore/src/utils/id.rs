use uuid::Uuid;

pub fn uuid_v5(ns: Uuid, name: &str) -> Uuid {
    Uuid::new_v5(&ns, name.as_bytes())
}

pub fn stable_node_id(label: &str, business_key: i64) -> Uuid {
    // name 形如 "Usuario|id=42"
    let name = format!("{label}|id={business_key}");
    uuid_v5(Uuid::NAMESPACE_OID, &name)
}

pub fn stable_edge_id(edge_label: &str, from: &Uuid, to: &Uuid) -> Uuid {
    let name = format!("{}|{}|{}", edge_label, from, to);
    uuid_v5(Uuid::NAMESPACE_OID, &name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_are_stable_per_label_and_key() {
        assert_eq!(stable_node_id("Usuario", 42), stable_node_id("Usuario", 42));
        assert_ne!(stable_node_id("Usuario", 1), stable_node_id("Actividad", 1));
    }

    #[test]
    fn test_edge_ids_depend_on_direction() {
        let a = stable_node_id("Usuario", 1);
        let b = stable_node_id("Objetivo", 1);
        assert_ne!(
            stable_edge_id("CUMPLIO", &a, &b),
            stable_edge_id("CUMPLIO", &b, &a)
        );
    }
}
