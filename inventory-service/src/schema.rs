diesel::table! {
    products (id) {
        id -> Uuid,
        name -> Varchar,
        price -> Numeric,
        quantity -> Int4,
        description -> Nullable<Text>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    transactions (id) {
        id -> Uuid,
        kind -> Varchar,
        quantity_change -> Int4,
        amount -> Numeric,
        reason -> Text,
        user_id -> Uuid,
        product_id -> Uuid,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    users (id) {
        id -> Uuid,
        username -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(transactions -> products (product_id));
diesel::joinable!(transactions -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    products,
    transactions,
    users,
);
